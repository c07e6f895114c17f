//! The retrieval pipeline.
//!
//! A query moves through a fixed sequence of stages:
//!
//! ```text
//! PlanExtraction -> CandidateRetrieval -> [RelevanceRefinement] -> FilterIntersection -> Synthesis -> Done
//! ```
//!
//! Planner and refiner failures fall back to the raw query and the
//! unrefined candidates. An unreachable embedding service yields zero
//! candidates. Only storage failures, index inconsistencies, invalid
//! requests and the per-query deadline surface as errors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use curbside_core::config::{PipelineConfig, SearchConfig};
use curbside_core::error::{CurbsideError, Result};
use curbside_core::source::ReportSource;
use curbside_core::types::Report;
use curbside_vector::embedding::DynEmbeddingService;
use curbside_vector::search::{SearchEngine, SemanticMatches};
use curbside_vector::sync::{IndexSynchronizer, SyncOutcome};

use crate::filter::{FilterEvaluator, FilterField, FilterOutcome, InvalidFilter};
use crate::generation::TextGenerator;
use crate::merge::{AppliedFilter, ToolOutcomes};
use crate::plan::{PlanFilters, Planner};
use crate::refine::Refiner;

// =============================================================================
// Stages
// =============================================================================

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PlanExtraction,
    CandidateRetrieval,
    RelevanceRefinement,
    FilterIntersection,
    Synthesis,
    Done,
}

/// Check that the pipeline may move from `from` to `to`.
///
/// The sequence is linear; refinement is the only stage that may be skipped.
pub fn validate_transition(from: Stage, to: Stage) -> Result<()> {
    let valid = matches!(
        (from, to),
        (Stage::PlanExtraction, Stage::CandidateRetrieval)
            | (Stage::CandidateRetrieval, Stage::RelevanceRefinement)
            | (Stage::CandidateRetrieval, Stage::FilterIntersection)
            | (Stage::RelevanceRefinement, Stage::FilterIntersection)
            | (Stage::FilterIntersection, Stage::Synthesis)
            | (Stage::Synthesis, Stage::Done)
    );

    if valid {
        Ok(())
    } else {
        Err(CurbsideError::Validation(format!(
            "invalid pipeline transition {:?} -> {:?}",
            from, to
        )))
    }
}

/// Stage that follows candidate retrieval: refinement only when it was
/// asked for and there is something to refine.
pub fn after_retrieval(refine: bool, candidates: usize) -> Stage {
    if refine && candidates > 0 {
        Stage::RelevanceRefinement
    } else {
        Stage::FilterIntersection
    }
}

/// Stages visited so far, always starting at plan extraction.
struct Trace {
    stages: Vec<Stage>,
}

impl Trace {
    fn start() -> Self {
        Self {
            stages: vec![Stage::PlanExtraction],
        }
    }

    fn advance(&mut self, to: Stage) -> Result<()> {
        let from = self.stages.last().copied().unwrap_or(Stage::PlanExtraction);
        validate_transition(from, to)?;
        debug!(stage = ?to, "Pipeline stage");
        self.stages.push(to);
        Ok(())
    }
}

// =============================================================================
// Requests and results
// =============================================================================

fn default_radius_km() -> f64 {
    1.0
}

/// Restrict results to a circle around a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFilter {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
}

/// One retrieval request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub query: String,
    /// Candidate count; clamped to `search.max_top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Overrides `pipeline.refine`.
    #[serde(default)]
    pub refine: Option<bool>,
    /// Filter values set by the caller. Each one replaces the planner's
    /// value for the same field.
    #[serde(default)]
    pub filters: PlanFilters,
    #[serde(default)]
    pub location: Option<LocationFilter>,
    /// Per-request deadline; never extends `pipeline.timeout_secs`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// Final report ids in ranking order.
    pub matching_ids: Vec<Uuid>,
    /// Similarity score of each final id.
    pub scores: BTreeMap<Uuid, f64>,
    pub count: usize,
    pub summary: String,
    pub reasoning: String,
    pub semantic_query: String,
    /// True when the planner could not be used.
    pub plan_fallback: bool,
    /// Reports in the snapshot the query ran against.
    pub total_reports: usize,
    pub trace: Vec<Stage>,
    pub filters_applied: Vec<AppliedFilter>,
    pub invalid_filters: Vec<InvalidFilter>,
}

/// Human-readable summary of a result.
pub fn summarize(query: &str, count: usize) -> String {
    if count == 0 {
        format!("No reports found matching '{}'.", query)
    } else {
        format!("Found {} reports matching your search.", count)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Ties the report source, the index, the collaborators and the filters
/// together. Cheap to share behind an `Arc`.
pub struct RetrievalPipeline {
    source: Arc<dyn ReportSource>,
    synchronizer: Arc<IndexSynchronizer>,
    engine: SearchEngine,
    planner: Planner,
    refiner: Refiner,
    filters: FilterEvaluator,
    search: SearchConfig,
    config: PipelineConfig,
}

impl RetrievalPipeline {
    pub fn new(
        source: Arc<dyn ReportSource>,
        synchronizer: Arc<IndexSynchronizer>,
        embedder: Arc<dyn DynEmbeddingService>,
        generator: Arc<dyn TextGenerator>,
        search: SearchConfig,
        config: PipelineConfig,
    ) -> Self {
        let engine = SearchEngine::new(Arc::clone(synchronizer.index()), embedder);
        Self {
            planner: Planner::new(Arc::clone(&generator)),
            refiner: Refiner::new(generator, Arc::clone(&source), config.refine_window),
            filters: FilterEvaluator::new(Arc::clone(&source)),
            source,
            synchronizer,
            engine,
            search,
            config,
        }
    }

    pub fn filters(&self) -> &FilterEvaluator {
        &self.filters
    }

    pub fn source(&self) -> &Arc<dyn ReportSource> {
        &self.source
    }

    pub fn index_size(&self) -> Result<usize> {
        self.synchronizer.index().len()
    }

    /// Synchronize the index with the current report listing.
    pub async fn synchronize(&self, force_rebuild: bool) -> Result<SyncOutcome> {
        self.synchronizer
            .sync_from(self.source.as_ref(), force_rebuild)
            .await
    }

    /// Direct similarity search, after bringing the index up to date.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<SemanticMatches> {
        let top_k = self.resolve_top_k(top_k, self.search.default_top_k);
        let threshold = self.resolve_threshold(threshold)?;
        if query.trim().is_empty() {
            return Err(CurbsideError::Validation("query must not be empty".to_string()));
        }

        let snapshot = self.source.list_reports()?;
        self.refresh_index(&snapshot).await?;
        let hits = self.engine.search_similar(query, top_k, threshold).await?;
        Ok(SemanticMatches::from(hits))
    }

    /// Run `request` under its own deadline, capped by the configured one.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineResult> {
        let limit = self.resolve_timeout(request.timeout_ms)?;
        self.run_with_timeout(request, limit).await
    }

    /// Run `request`, giving up with [`CurbsideError::Timeout`] after `limit`.
    pub async fn run_with_timeout(
        &self,
        request: PipelineRequest,
        limit: Duration,
    ) -> Result<PipelineResult> {
        if request.query.trim().is_empty() {
            return Err(CurbsideError::Validation("query must not be empty".to_string()));
        }
        let top_k = self.resolve_top_k(request.top_k, self.search.pipeline_top_k);
        let threshold = self.resolve_threshold(request.threshold)?;

        match tokio::time::timeout(limit, self.execute(&request, top_k, threshold)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(query = %request.query, ?limit, "Pipeline timed out");
                Err(CurbsideError::Timeout(limit))
            }
        }
    }

    async fn execute(
        &self,
        request: &PipelineRequest,
        top_k: usize,
        threshold: f64,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let query = request.query.trim();
        let mut trace = Trace::start();

        let outcome = self.planner.plan(query).await;
        let plan_fallback = outcome.is_fallback();
        let plan = outcome.into_plan();

        trace.advance(Stage::CandidateRetrieval)?;
        let snapshot = self.source.list_reports()?;
        self.refresh_index(&snapshot).await?;
        let hits = match self
            .engine
            .search_similar(&plan.semantic_query, top_k, threshold)
            .await
        {
            Ok(hits) => hits,
            Err(e) if e.is_collaborator() => {
                warn!(error = %e, "Similarity search unavailable, no candidates");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let scores: BTreeMap<Uuid, f64> = hits.iter().map(|hit| (hit.id, hit.score)).collect();
        let mut candidates: Vec<Uuid> = hits.iter().map(|hit| hit.id).collect();

        let refine = request.refine.unwrap_or(self.config.refine);
        if after_retrieval(refine, candidates.len()) == Stage::RelevanceRefinement {
            trace.advance(Stage::RelevanceRefinement)?;
            candidates = self.refiner.refine(query, &candidates).await.candidates;
        }

        trace.advance(Stage::FilterIntersection)?;
        let filters = plan.filters.overridden_by(&request.filters);
        let mut tools = ToolOutcomes::new();
        let mut invalid_filters = Vec::new();
        for (field, value) in [
            (FilterField::Category, &filters.category),
            (FilterField::Severity, &filters.severity),
            (FilterField::Status, &filters.status),
        ] {
            let Some(value) = value else { continue };
            match self.filters.by_field(field, value)? {
                FilterOutcome::Matched(m) => tools.record(field, m.ids),
                FilterOutcome::Invalid(invalid) => {
                    warn!(field = %field, value = %value, "Skipping invalid filter");
                    invalid_filters.push(invalid);
                }
            }
        }
        if let Some(loc) = request.location {
            match self.filters.by_location(loc.lat, loc.lng, loc.radius_km)? {
                FilterOutcome::Matched(m) => tools.record(FilterField::Location, m.ids),
                FilterOutcome::Invalid(invalid) => invalid_filters.push(invalid),
            }
        }
        let matching_ids = tools.intersect(&candidates);

        trace.advance(Stage::Synthesis)?;
        let count = matching_ids.len();
        let summary = summarize(query, count);
        let scores = matching_ids
            .iter()
            .filter_map(|id| scores.get(id).map(|score| (*id, *score)))
            .collect();

        trace.advance(Stage::Done)?;
        info!(
            query,
            semantic_query = %plan.semantic_query,
            count,
            plan_fallback,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline complete"
        );

        Ok(PipelineResult {
            matching_ids,
            scores,
            count,
            summary,
            reasoning: plan.reasoning,
            semantic_query: plan.semantic_query,
            plan_fallback,
            total_reports: snapshot.len(),
            trace: trace.stages,
            filters_applied: tools.applied(),
            invalid_filters,
        })
    }

    /// Bring the index up to date before searching. Embedding failures leave
    /// the previous index in place, and a pass already in flight is not
    /// waited for.
    async fn refresh_index(&self, snapshot: &[Report]) -> Result<()> {
        match self.synchronizer.try_synchronize(snapshot, false).await {
            None => {
                debug!("Index sync in progress, searching current index");
                Ok(())
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) if e.is_consistency() => Err(e),
            Some(Err(e)) => {
                warn!(error = %e, "Index sync failed, searching existing index");
                Ok(())
            }
        }
    }

    fn resolve_timeout(&self, requested_ms: Option<u64>) -> Result<Duration> {
        let ceiling = Duration::from_secs(self.config.timeout_secs);
        match requested_ms {
            None => Ok(ceiling),
            Some(0) => Err(CurbsideError::Validation(
                "timeout_ms must be greater than zero".to_string(),
            )),
            Some(ms) => Ok(Duration::from_millis(ms).min(ceiling)),
        }
    }

    fn resolve_top_k(&self, requested: Option<usize>, default: usize) -> usize {
        requested.unwrap_or(default).min(self.search.max_top_k)
    }

    fn resolve_threshold(&self, requested: Option<f64>) -> Result<f64> {
        let threshold = requested.unwrap_or(self.search.threshold);
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(CurbsideError::Validation(format!(
                "threshold must be within [-1, 1], got {}",
                threshold
            )));
        }
        Ok(threshold)
    }
}

impl std::fmt::Debug for RetrievalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalPipeline")
            .field("indexed", &self.index_size().ok())
            .field("search", &self.search)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::DisabledGenerator;
    use crate::testing::{report, repository, ScriptedGenerator};
    use curbside_core::types::Coordinates;
    use curbside_vector::embedding::{EmbeddingService, MockEmbedding};
    use curbside_vector::index::VectorIndex;

    struct Fixture {
        pipeline: RetrievalPipeline,
        embedder: MockEmbedding,
        reports: Vec<Report>,
    }

    impl Fixture {
        fn id(&self, i: usize) -> Uuid {
            self.reports[i].id
        }
    }

    fn reports() -> Vec<Report> {
        let mut ramp = report("Missing ramp at library entrance", "missing_ramp", "high", "open");
        ramp.location = Some(Coordinates { lat: 40.7128, lng: -74.0060 });
        vec![
            ramp,
            report("Ramp missing handrail near park", "no_ramp", "low", "resolved"),
            report("Broken streetlight on Main Street", "poor_lighting", "medium", "open"),
            report("Deep pothole blocking crosswalk", "pothole", "high", "open"),
        ]
    }

    fn fixture_with(reports: Vec<Report>, generator: Arc<dyn TextGenerator>, refine: bool) -> Fixture {
        let embedder = MockEmbedding::new();
        let index = Arc::new(VectorIndex::new(MockEmbedding::DEFAULT_DIMENSIONS));
        let shared: Arc<dyn DynEmbeddingService> = Arc::new(embedder.clone());
        let synchronizer = Arc::new(IndexSynchronizer::new(index, Arc::clone(&shared)));
        let search = SearchConfig {
            threshold: 0.3,
            ..Default::default()
        };
        let config = PipelineConfig {
            refine,
            ..Default::default()
        };
        let pipeline = RetrievalPipeline::new(
            repository(&reports),
            synchronizer,
            shared,
            generator,
            search,
            config,
        );
        Fixture {
            pipeline,
            embedder,
            reports,
        }
    }

    fn fixture(generator: Arc<dyn TextGenerator>) -> Fixture {
        fixture_with(reports(), generator, false)
    }

    fn planned(json: &str) -> Arc<dyn TextGenerator> {
        Arc::new(ScriptedGenerator::new(vec![Ok(json.to_string())]))
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    #[test]
    fn test_linear_transitions_are_valid() {
        assert!(validate_transition(Stage::PlanExtraction, Stage::CandidateRetrieval).is_ok());
        assert!(validate_transition(Stage::CandidateRetrieval, Stage::RelevanceRefinement).is_ok());
        assert!(validate_transition(Stage::CandidateRetrieval, Stage::FilterIntersection).is_ok());
        assert!(validate_transition(Stage::RelevanceRefinement, Stage::FilterIntersection).is_ok());
        assert!(validate_transition(Stage::FilterIntersection, Stage::Synthesis).is_ok());
        assert!(validate_transition(Stage::Synthesis, Stage::Done).is_ok());
    }

    #[test]
    fn test_backtracking_is_invalid() {
        assert!(validate_transition(Stage::RelevanceRefinement, Stage::CandidateRetrieval).is_err());
        assert!(validate_transition(Stage::Done, Stage::PlanExtraction).is_err());
        assert!(validate_transition(Stage::PlanExtraction, Stage::Synthesis).is_err());
        assert!(validate_transition(Stage::Synthesis, Stage::Synthesis).is_err());
    }

    #[test]
    fn test_refinement_routing() {
        assert_eq!(after_retrieval(true, 3), Stage::RelevanceRefinement);
        assert_eq!(after_retrieval(true, 0), Stage::FilterIntersection);
        assert_eq!(after_retrieval(false, 3), Stage::FilterIntersection);
    }

    #[test]
    fn test_summary() {
        assert_eq!(summarize("ramps", 0), "No reports found matching 'ramps'.");
        assert_eq!(summarize("ramps", 3), "Found 3 reports matching your search.");
    }

    // =====================================================================
    // Runs
    // =====================================================================

    #[tokio::test]
    async fn test_planner_failure_searches_raw_query() {
        let f = fixture(Arc::new(DisabledGenerator));
        let result = f.pipeline.run(PipelineRequest::new("missing ramp")).await.unwrap();

        assert!(result.plan_fallback);
        assert_eq!(result.semantic_query, "missing ramp");
        assert_eq!(result.matching_ids, vec![f.id(0), f.id(1)]);
        assert_eq!(result.count, 2);
        assert_eq!(result.summary, "Found 2 reports matching your search.");
        assert_eq!(result.total_reports, 4);
        assert!(result.scores[&f.id(0)] > result.scores[&f.id(1)]);
        assert_eq!(
            result.trace,
            vec![
                Stage::PlanExtraction,
                Stage::CandidateRetrieval,
                Stage::FilterIntersection,
                Stage::Synthesis,
                Stage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_planned_filter_narrows_candidates() {
        let f = fixture(planned(
            r#"{"semantic_query": "missing ramp", "filters": {"severity": "high"}, "reasoning": "severe ramp issues"}"#,
        ));
        let result = f
            .pipeline
            .run(PipelineRequest::new("severe ramp problems"))
            .await
            .unwrap();

        assert!(!result.plan_fallback);
        assert_eq!(result.reasoning, "severe ramp issues");
        assert_eq!(result.matching_ids, vec![f.id(0)]);
        assert_eq!(result.scores.len(), 1);
        assert_eq!(
            result.filters_applied,
            vec![AppliedFilter { field: FilterField::Severity, matched: 2 }]
        );
    }

    #[tokio::test]
    async fn test_invalid_planned_filter_is_skipped() {
        let f = fixture(planned(
            r#"{"semantic_query": "missing ramp", "filters": {"category": "lava"}}"#,
        ));
        let result = f.pipeline.run(PipelineRequest::new("ramps")).await.unwrap();

        assert_eq!(result.matching_ids, vec![f.id(0), f.id(1)]);
        assert!(result.filters_applied.is_empty());
        assert_eq!(result.invalid_filters.len(), 1);
        assert_eq!(result.invalid_filters[0].field, FilterField::Category);
        assert!(result.invalid_filters[0].error.contains("Must be one of"));
    }

    #[tokio::test]
    async fn test_explicit_filter_overrides_plan() {
        let f = fixture(planned(
            r#"{"semantic_query": "missing ramp", "filters": {"severity": "high"}}"#,
        ));
        let request = PipelineRequest {
            filters: PlanFilters {
                severity: Some("low".to_string()),
                ..Default::default()
            },
            ..PipelineRequest::new("ramps")
        };
        let result = f.pipeline.run(request).await.unwrap();
        assert_eq!(result.matching_ids, vec![f.id(1)]);
    }

    #[tokio::test]
    async fn test_filter_with_no_matches_yields_no_results() {
        let f = fixture(Arc::new(DisabledGenerator));
        let request = PipelineRequest {
            filters: PlanFilters {
                status: Some("acknowledged".to_string()),
                ..Default::default()
            },
            ..PipelineRequest::new("missing ramp")
        };
        let result = f.pipeline.run(request).await.unwrap();

        assert!(result.matching_ids.is_empty());
        assert!(result.scores.is_empty());
        assert_eq!(result.summary, "No reports found matching 'missing ramp'.");
        assert_eq!(
            result.filters_applied,
            vec![AppliedFilter { field: FilterField::Status, matched: 0 }]
        );
    }

    #[tokio::test]
    async fn test_location_filter() {
        let f = fixture(Arc::new(DisabledGenerator));
        let request = PipelineRequest {
            location: Some(LocationFilter { lat: 40.7130, lng: -74.0062, radius_km: 1.0 }),
            ..PipelineRequest::new("missing ramp")
        };
        let result = f.pipeline.run(request).await.unwrap();
        assert_eq!(result.matching_ids, vec![f.id(0)]);

        let request = PipelineRequest {
            location: Some(LocationFilter { lat: 95.0, lng: 0.0, radius_km: 1.0 }),
            ..PipelineRequest::new("missing ramp")
        };
        let result = f.pipeline.run(request).await.unwrap();
        assert_eq!(result.matching_ids, vec![f.id(0), f.id(1)]);
        assert_eq!(result.invalid_filters[0].field, FilterField::Location);
    }

    #[tokio::test]
    async fn test_embedding_outage_returns_zero_matches() {
        let f = fixture(Arc::new(DisabledGenerator));
        f.embedder.set_failing(true);

        let result = f.pipeline.run(PipelineRequest::new("missing ramp")).await.unwrap();
        assert_eq!(result.count, 0);
        assert_eq!(result.total_reports, 4);
        assert_eq!(f.pipeline.index_size().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refinement_keeps_selected() {
        let reports = reports();
        let answer = format!("[\"{}\"]", reports[1].id);
        let generator = ScriptedGenerator::new(vec![
            Err(CurbsideError::Generation("planner down".to_string())),
            Ok(answer),
        ]);
        let f = fixture_with(reports, Arc::new(generator.clone()), true);

        let result = f.pipeline.run(PipelineRequest::new("missing ramp")).await.unwrap();
        assert_eq!(result.matching_ids, vec![f.id(1)]);
        assert!(result.trace.contains(&Stage::RelevanceRefinement));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_refinement_failure_keeps_candidates() {
        let f = fixture_with(reports(), Arc::new(DisabledGenerator), true);
        let result = f.pipeline.run(PipelineRequest::new("missing ramp")).await.unwrap();
        assert_eq!(result.matching_ids, vec![f.id(0), f.id(1)]);
        assert!(result.trace.contains(&Stage::RelevanceRefinement));
    }

    #[tokio::test]
    async fn test_refinement_skipped_without_candidates() {
        let generator = ScriptedGenerator::new(vec![]);
        let f = fixture_with(reports(), Arc::new(generator.clone()), true);
        let result = f.pipeline.run(PipelineRequest::new("graffiti wall")).await.unwrap();

        assert_eq!(result.count, 0);
        assert!(!result.trace.contains(&Stage::RelevanceRefinement));
        // Only the planner was consulted.
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_top_k_limits_candidates() {
        let f = fixture(Arc::new(DisabledGenerator));
        let request = PipelineRequest {
            top_k: Some(1),
            ..PipelineRequest::new("missing ramp")
        };
        let result = f.pipeline.run(request).await.unwrap();
        assert_eq!(result.matching_ids, vec![f.id(0)]);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let f = fixture_with(Vec::new(), Arc::new(DisabledGenerator), false);
        let result = f.pipeline.run(PipelineRequest::new("missing ramp")).await.unwrap();
        assert_eq!(result.count, 0);
        assert_eq!(result.total_reports, 0);
        assert_eq!(f.embedder.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let f = fixture(Arc::new(DisabledGenerator));
        let err = f.pipeline.run(PipelineRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, CurbsideError::Validation(_)));

        let request = PipelineRequest {
            threshold: Some(1.5),
            ..PipelineRequest::new("ramps")
        };
        let err = f.pipeline.run(request).await.unwrap_err();
        assert!(matches!(err, CurbsideError::Validation(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let generator = ScriptedGenerator::new(vec![Ok("{}".to_string())])
            .with_delay(Duration::from_secs(2));
        let f = fixture(Arc::new(generator));

        let err = f
            .pipeline
            .run_with_timeout(PipelineRequest::new("missing ramp"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CurbsideError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_request_deadline() {
        let generator = ScriptedGenerator::new(vec![Ok("{}".to_string())])
            .with_delay(Duration::from_secs(2));
        let f = fixture(Arc::new(generator));

        let request = PipelineRequest {
            timeout_ms: Some(50),
            ..PipelineRequest::new("missing ramp")
        };
        let err = f.pipeline.run(request).await.unwrap_err();
        assert!(matches!(err, CurbsideError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[test]
    fn test_request_deadline_is_capped() {
        let f = fixture(Arc::new(DisabledGenerator));
        assert_eq!(f.pipeline.resolve_timeout(None).unwrap(), Duration::from_secs(30));
        assert_eq!(
            f.pipeline.resolve_timeout(Some(250)).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            f.pipeline.resolve_timeout(Some(600_000)).unwrap(),
            Duration::from_secs(30)
        );
        assert!(matches!(
            f.pipeline.resolve_timeout(Some(0)),
            Err(CurbsideError::Validation(_))
        ));
    }

    // =====================================================================
    // Direct search and sync
    // =====================================================================

    #[tokio::test]
    async fn test_semantic_search_syncs_lazily() {
        let f = fixture(Arc::new(DisabledGenerator));
        assert_eq!(f.pipeline.index_size().unwrap(), 0);

        let matches = f.pipeline.semantic_search("pothole", None, None).await.unwrap();
        assert_eq!(matches.ids, vec![f.id(3)]);
        assert_eq!(matches.count, 1);
        assert_eq!(f.pipeline.index_size().unwrap(), 4);

        // Second call finds nothing new to embed.
        f.pipeline.semantic_search("pothole", None, None).await.unwrap();
        assert_eq!(f.embedder.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_synchronize_and_rebuild() {
        let f = fixture(Arc::new(DisabledGenerator));
        let first = f.pipeline.synchronize(false).await.unwrap();
        assert_eq!(first.indexed, 4);
        assert_eq!(first.embedded, 4);

        let again = f.pipeline.synchronize(false).await.unwrap();
        assert_eq!(again.embedded, 0);

        let rebuilt = f.pipeline.synchronize(true).await.unwrap();
        assert!(rebuilt.rebuilt);
        assert_eq!(rebuilt.embedded, 4);
        assert_eq!(f.pipeline.index_size().unwrap(), 4);
    }

    /// Mock embeddings whose batch calls take `delay` once slowed down.
    struct SlowBatches {
        inner: MockEmbedding,
        slow: Arc<std::sync::atomic::AtomicBool>,
        delay: Duration,
    }

    impl EmbeddingService for SlowBatches {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.slow.load(std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.embed_batch(texts).await
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            self.inner.embed_query(text).await
        }

        fn dimensions(&self) -> usize {
            EmbeddingService::dimensions(&self.inner)
        }
    }

    #[tokio::test]
    async fn test_search_does_not_wait_for_running_sync() {
        let reports = reports();
        let pothole = reports[3].id;
        let slow = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let embedder: Arc<dyn DynEmbeddingService> = Arc::new(SlowBatches {
            inner: MockEmbedding::new(),
            slow: Arc::clone(&slow),
            delay: Duration::from_secs(2),
        });
        let index = Arc::new(VectorIndex::new(MockEmbedding::DEFAULT_DIMENSIONS));
        let synchronizer = Arc::new(IndexSynchronizer::new(index, Arc::clone(&embedder)));
        let pipeline = Arc::new(RetrievalPipeline::new(
            repository(&reports),
            synchronizer,
            embedder,
            Arc::new(DisabledGenerator),
            SearchConfig::default(),
            PipelineConfig::default(),
        ));
        pipeline.synchronize(false).await.unwrap();

        slow.store(true, std::sync::atomic::Ordering::SeqCst);
        let rebuild = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.synchronize(true).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        let matches = pipeline
            .semantic_search("pothole", None, Some(0.0))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(matches.ids[0], pothole);

        let outcome = rebuild.await.unwrap().unwrap();
        assert!(outcome.rebuilt);
        assert_eq!(pipeline.index_size().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_request_deserializes_with_defaults() {
        let request: PipelineRequest = serde_json::from_str(
            r#"{"query": "ramps", "filters": {"severity": "high"}, "location": {"lat": 1.0, "lng": 2.0}}"#,
        )
        .unwrap();
        assert_eq!(request.top_k, None);
        assert_eq!(request.filters.severity.as_deref(), Some("high"));
        assert_eq!(request.location.unwrap().radius_km, 1.0);
        assert_eq!(request.timeout_ms, None);
    }
}
