//! Index synchronization: reconciles the vector index with a snapshot of
//! reports, re-embedding only what changed.
//!
//! The synchronizer owns the fingerprint cache (report id -> canonical text
//! last embedded). A report is dirty when it is missing from the cache or its
//! canonical text differs. Each pass runs as one critical section under an
//! async mutex: dirty check, embedding call, index update and cache update.
//! Searches never wait on that mutex: the lazy refresh before a search uses
//! [`IndexSynchronizer::try_synchronize`] and falls back to the current index
//! while another pass is embedding.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use curbside_core::error::{CurbsideError, Result};
use curbside_core::source::ReportSource;
use curbside_core::types::Report;

use crate::embedding::{ensure_finite, DynEmbeddingService};
use crate::index::{normalize, IndexEntry, IndexUpdate, VectorIndex};
use crate::text::canonical_text;

/// What a synchronization pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Index size after the pass.
    pub indexed: usize,
    /// Reports sent to the embedding service.
    pub embedded: usize,
    /// Reports dropped because they left the snapshot.
    pub removed: usize,
    pub rebuilt: bool,
}

/// Keeps a [`VectorIndex`] in step with the report store.
pub struct IndexSynchronizer {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
    fingerprints: Mutex<HashMap<Uuid, String>>,
}

impl IndexSynchronizer {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            index,
            embedder,
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Canonical text last embedded for `id`, if any.
    pub async fn fingerprint(&self, id: Uuid) -> Option<String> {
        self.fingerprints.lock().await.get(&id).cloned()
    }

    /// List the source and synchronize against that snapshot.
    pub async fn sync_from(
        &self,
        source: &dyn ReportSource,
        force_rebuild: bool,
    ) -> Result<SyncOutcome> {
        let reports = source.list_reports()?;
        self.synchronize(&reports, force_rebuild).await
    }

    /// Reconcile the index with `reports`.
    ///
    /// On any error (embedding failure, wrong vector count, wrong dimension)
    /// neither the index nor the fingerprint cache is modified, so the call
    /// can simply be retried.
    pub async fn synchronize(&self, reports: &[Report], force_rebuild: bool) -> Result<SyncOutcome> {
        let cache = self.fingerprints.lock().await;
        self.reconcile(cache, reports, force_rebuild).await
    }

    /// Like [`synchronize`](Self::synchronize), but returns `None` at once
    /// when another pass holds the cache instead of queueing behind it.
    pub async fn try_synchronize(
        &self,
        reports: &[Report],
        force_rebuild: bool,
    ) -> Option<Result<SyncOutcome>> {
        let cache = self.fingerprints.try_lock().ok()?;
        Some(self.reconcile(cache, reports, force_rebuild).await)
    }

    async fn reconcile(
        &self,
        mut cache: MutexGuard<'_, HashMap<Uuid, String>>,
        reports: &[Report],
        force_rebuild: bool,
    ) -> Result<SyncOutcome> {
        let mut seen = HashSet::with_capacity(reports.len());
        let current: Vec<(Uuid, String)> = reports
            .iter()
            .filter(|report| seen.insert(report.id))
            .map(|report| (report.id, canonical_text(report)))
            .collect();

        let dirty: Vec<(Uuid, String)> = if force_rebuild {
            current
        } else {
            current
                .into_iter()
                .filter(|(id, text)| cache.get(id) != Some(text))
                .collect()
        };
        let removals: Vec<Uuid> = if force_rebuild {
            Vec::new()
        } else {
            cache
                .keys()
                .filter(|id| !seen.contains(*id))
                .copied()
                .collect()
        };

        if !force_rebuild && dirty.is_empty() && removals.is_empty() {
            let indexed = self.index.len()?;
            debug!(indexed, "Index up to date, nothing to embed");
            return Ok(SyncOutcome {
                indexed,
                embedded: 0,
                removed: 0,
                rebuilt: false,
            });
        }

        let texts: Vec<String> = dirty.iter().map(|(_, text)| text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch_boxed(&texts).await?
        };
        if vectors.len() != texts.len() {
            return Err(CurbsideError::Embedding(format!(
                "embedding service returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            ensure_finite(vector)?;
        }

        let entries: Vec<IndexEntry> = dirty
            .iter()
            .zip(vectors)
            .map(|((id, text), vector)| IndexEntry {
                id: *id,
                vector: normalize(vector),
                text: text.clone(),
            })
            .collect();
        let embedded = entries.len();
        let removed = removals.len();

        if force_rebuild {
            self.index.replace_all(entries)?;
            *cache = dirty.into_iter().collect();
        } else {
            self.index.apply(IndexUpdate {
                upserts: entries,
                removals: removals.clone(),
            })?;
            for id in &removals {
                cache.remove(id);
            }
            cache.extend(dirty);
        }

        let indexed = self.index.len()?;
        info!(
            indexed,
            embedded,
            removed,
            rebuilt = force_rebuild,
            "Vector index synchronized"
        );
        Ok(SyncOutcome {
            indexed,
            embedded,
            removed,
            rebuilt: force_rebuild,
        })
    }
}

impl std::fmt::Debug for IndexSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSynchronizer")
            .field("indexed", &self.index.len().ok())
            .finish()
    }
}
