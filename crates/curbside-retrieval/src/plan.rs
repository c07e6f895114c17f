//! Search planning: turn a free-text request into a semantic query plus
//! optional filter values.
//!
//! Parsing is total. Whatever the generator returns, the result is either a
//! [`PlanOutcome::Parsed`] plan or the [`PlanOutcome::Fallback`] plan that
//! searches the raw query with no filters.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use curbside_core::types::{Category, Label, ReportStatus, Severity};

use crate::generation::TextGenerator;

const FALLBACK_REASONING: &str = "Direct search - could not parse structured intent";

/// Filter values proposed by the planner, as written. They are validated
/// when the filters run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFilters {
    pub category: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
}

impl PlanFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.severity.is_none() && self.status.is_none()
    }

    /// Field-wise override: values set in `explicit` win.
    pub fn overridden_by(&self, explicit: &PlanFilters) -> PlanFilters {
        PlanFilters {
            category: explicit.category.clone().or_else(|| self.category.clone()),
            severity: explicit.severity.clone().or_else(|| self.severity.clone()),
            status: explicit.status.clone().or_else(|| self.status.clone()),
        }
    }
}

/// Structured intent for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub semantic_query: String,
    pub filters: PlanFilters,
    pub reasoning: String,
}

impl SearchPlan {
    /// Search the raw query, no filters.
    pub fn fallback(raw_query: &str) -> Self {
        Self {
            semantic_query: raw_query.to_string(),
            filters: PlanFilters::default(),
            reasoning: FALLBACK_REASONING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Parsed(SearchPlan),
    Fallback(SearchPlan),
}

impl PlanOutcome {
    pub fn plan(&self) -> &SearchPlan {
        match self {
            PlanOutcome::Parsed(plan) | PlanOutcome::Fallback(plan) => plan,
        }
    }

    pub fn into_plan(self) -> SearchPlan {
        match self {
            PlanOutcome::Parsed(plan) | PlanOutcome::Fallback(plan) => plan,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PlanOutcome::Fallback(_))
    }
}

/// Outermost `{...}` span, across lines.
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("Invalid JSON object regex"));

/// Parse planner output for `raw_query`. Never fails.
pub fn parse_plan(raw_query: &str, output: &str) -> PlanOutcome {
    let stripped = output.replace("```json", "").replace("```", "");
    let Some(object) = JSON_OBJECT.find(&stripped) else {
        return PlanOutcome::Fallback(SearchPlan::fallback(raw_query));
    };
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(object.as_str()) else {
        return PlanOutcome::Fallback(SearchPlan::fallback(raw_query));
    };

    let semantic_query =
        text_value(map.get("semantic_query")).unwrap_or_else(|| raw_query.to_string());
    let filters = match map.get("filters") {
        Some(Value::Object(f)) => PlanFilters {
            category: text_value(f.get("category")),
            severity: text_value(f.get("severity")),
            status: text_value(f.get("status")),
        },
        _ => PlanFilters::default(),
    };
    let reasoning = text_value(map.get("reasoning")).unwrap_or_default();

    PlanOutcome::Parsed(SearchPlan {
        semantic_query,
        filters,
        reasoning,
    })
}

/// A non-blank string that is not a spelled-out null.
fn text_value(value: Option<&Value>) -> Option<String> {
    let text = value?.as_str()?.trim();
    match text.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "any" => None,
        _ => Some(text.to_string()),
    }
}

/// System instruction for the planner, listing the accepted filter values.
pub fn planner_instruction() -> String {
    format!(
        "You are an accessibility search analyst.\n\
         Analyze the user's search query and extract:\n\
         1. The core semantic meaning for vector search\n\
         2. Any explicit filters (severity, category, status)\n\n\
         Respond with ONLY valid JSON:\n\
         {{\n\
         \x20   \"semantic_query\": \"the best natural language query for finding this\",\n\
         \x20   \"filters\": {{\"severity\": null, \"category\": null, \"status\": null}},\n\
         \x20   \"reasoning\": \"brief explanation of interpretation\"\n\
         }}\n\n\
         Severities: {}\n\
         Categories: {}\n\
         Statuses: {}",
        Severity::vocabulary(),
        Category::vocabulary(),
        ReportStatus::vocabulary()
    )
}

/// Asks the generator for a plan and parses the answer.
#[derive(Clone)]
pub struct Planner {
    generator: Arc<dyn TextGenerator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Plan `query`. Generator failures yield the fallback plan.
    pub async fn plan(&self, query: &str) -> PlanOutcome {
        match self.generator.complete(&planner_instruction(), query).await {
            Ok(output) => {
                let outcome = parse_plan(query, &output);
                if outcome.is_fallback() {
                    warn!("Planner output was not a JSON plan, searching raw query");
                } else {
                    debug!(plan = ?outcome.plan(), "Parsed search plan");
                }
                outcome
            }
            Err(e) => {
                warn!(error = %e, "Planner unavailable, searching raw query");
                PlanOutcome::Fallback(SearchPlan::fallback(query))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::DisabledGenerator;
    use crate::testing::ScriptedGenerator;

    const QUERY: &str = "high severity missing ramps";

    #[test]
    fn test_parse_clean_json() {
        let output = r#"{"semantic_query": "missing wheelchair ramps", "filters": {"severity": "high", "category": "missing_ramp", "status": null}, "reasoning": "User wants severe ramp issues"}"#;
        let PlanOutcome::Parsed(plan) = parse_plan(QUERY, output) else {
            panic!("expected parsed plan");
        };
        assert_eq!(plan.semantic_query, "missing wheelchair ramps");
        assert_eq!(plan.filters.severity.as_deref(), Some("high"));
        assert_eq!(plan.filters.category.as_deref(), Some("missing_ramp"));
        assert_eq!(plan.filters.status, None);
        assert_eq!(plan.reasoning, "User wants severe ramp issues");
    }

    #[test]
    fn test_parse_fenced_json_with_chatter() {
        let output = "Here is the plan:\n```json\n{\"semantic_query\": \"ramps\", \"filters\": {\"severity\": \"null\"}}\n```\nThanks";
        let outcome = parse_plan(QUERY, output);
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.plan().semantic_query, "ramps");
        assert!(outcome.plan().filters.is_empty());
        assert_eq!(outcome.plan().reasoning, "");
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        for output in ["", "I cannot help with that.", "{not json}", "[1, 2, 3]", "{\"a\": 1"] {
            let outcome = parse_plan(QUERY, output);
            assert!(outcome.is_fallback(), "expected fallback for {:?}", output);
            assert_eq!(outcome.plan().semantic_query, QUERY);
            assert!(outcome.plan().filters.is_empty());
        }
    }

    #[test]
    fn test_parse_missing_query_uses_raw() {
        let outcome = parse_plan(QUERY, r#"{"semantic_query": "  ", "filters": "none"}"#);
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.plan().semantic_query, QUERY);
        assert!(outcome.plan().filters.is_empty());
    }

    #[test]
    fn test_non_string_filter_values_ignored() {
        let outcome = parse_plan(QUERY, r#"{"semantic_query": "q", "filters": {"severity": 3, "status": ["open"]}}"#);
        assert!(outcome.plan().filters.is_empty());
    }

    #[test]
    fn test_override_is_field_wise() {
        let planned = PlanFilters {
            category: Some("pothole".into()),
            severity: Some("low".into()),
            status: None,
        };
        let explicit = PlanFilters {
            severity: Some("high".into()),
            ..Default::default()
        };
        let merged = planned.overridden_by(&explicit);
        assert_eq!(merged.category.as_deref(), Some("pothole"));
        assert_eq!(merged.severity.as_deref(), Some("high"));
        assert_eq!(merged.status, None);
    }

    #[test]
    fn test_instruction_lists_vocabularies() {
        let instruction = planner_instruction();
        assert!(instruction.contains("no_ramp"));
        assert!(instruction.contains("in_progress"));
        assert!(instruction.contains("\"semantic_query\""));
    }

    #[tokio::test]
    async fn test_planner_failure_falls_back() {
        let planner = Planner::new(Arc::new(DisabledGenerator));
        let outcome = planner.plan(QUERY).await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_plan(), SearchPlan::fallback(QUERY));
    }

    #[tokio::test]
    async fn test_planner_uses_generator_output() {
        let generator = ScriptedGenerator::new(vec![Ok(
            r#"{"semantic_query": "ramp", "filters": {"category": "no_ramp"}}"#.to_string(),
        )]);
        let planner = Planner::new(Arc::new(generator.clone()));
        let outcome = planner.plan(QUERY).await;
        assert_eq!(outcome.plan().filters.category.as_deref(), Some("no_ramp"));
        assert_eq!(generator.calls(), 1);
    }
}
