//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use curbside_core::config::CurbsideConfig;
use curbside_core::source::ReportSource;
use curbside_retrieval::{RetrievalPipeline, TextGenerator};
use curbside_storage::ReportRepository;
use curbside_vector::embedding::DynEmbeddingService;
use curbside_vector::{IndexSynchronizer, VectorIndex};

/// Shared application state. Every field is behind an `Arc`, so cloning per
/// request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CurbsideConfig>,
    pub repository: Arc<ReportRepository>,
    pub pipeline: Arc<RetrievalPipeline>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire an empty index of the embedder's dimension to the repository and
    /// both collaborators.
    pub fn new(
        config: CurbsideConfig,
        repository: ReportRepository,
        embedder: Arc<dyn DynEmbeddingService>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let repository = Arc::new(repository);
        let source: Arc<dyn ReportSource> = Arc::clone(&repository) as Arc<dyn ReportSource>;
        let index = Arc::new(VectorIndex::new(embedder.dimensions()));
        let synchronizer = Arc::new(IndexSynchronizer::new(index, Arc::clone(&embedder)));
        let pipeline = RetrievalPipeline::new(
            source,
            synchronizer,
            embedder,
            generator,
            config.search.clone(),
            config.pipeline.clone(),
        );
        Self {
            config: Arc::new(config),
            repository,
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        }
    }
}
