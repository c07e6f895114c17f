//! Similarity search: embed the query, search the index, apply a threshold.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use curbside_core::error::{CurbsideError, Result};

use crate::embedding::{ensure_finite, DynEmbeddingService};
use crate::index::{normalize, SearchHit, VectorIndex};

/// Ranked semantic matches as exposed to the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatches {
    /// Report ids by descending score.
    pub ids: Vec<Uuid>,
    pub scores: BTreeMap<Uuid, f64>,
    pub count: usize,
}

impl From<Vec<SearchHit>> for SemanticMatches {
    fn from(hits: Vec<SearchHit>) -> Self {
        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let scores = hits.iter().map(|h| (h.id, h.score)).collect();
        Self {
            count: ids.len(),
            ids,
            scores,
        }
    }
}

/// Search engine combining query embedding with exact vector search.
///
/// Uses dynamic dispatch so production code can supply the HTTP or ONNX
/// provider while tests use `MockEmbedding`.
pub struct SearchEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl SearchEngine {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self { index, embedder }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return up to `top_k` reports whose similarity to `query` is at least
    /// `threshold`, best first.
    ///
    /// An empty index returns no hits without calling the embedding service.
    pub async fn search_similar(
        &self,
        query: &str,
        top_k: usize,
        threshold: f64,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(CurbsideError::Validation("query must not be empty".to_string()));
        }
        let size = self.index.len()?;
        if size == 0 || top_k == 0 {
            debug!(size, top_k, "Skipping similarity search");
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query_boxed(query).await?;
        ensure_finite(&query_vec)?;
        let query_vec = normalize(query_vec);
        let mut hits = self.index.search(&query_vec, top_k.min(size))?;
        hits.retain(|hit| hit.score >= threshold);

        debug!(
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "Similarity search complete"
        );
        Ok(hits)
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("indexed", &self.index.len().ok())
            .finish()
    }
}
