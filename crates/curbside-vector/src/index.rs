//! In-memory vector index with exact inner-product search.
//!
//! Entries keep their insertion order, which also breaks score ties. Stored
//! vectors are expected to be unit length so that the inner product equals
//! cosine similarity; the index itself never normalizes (see [`normalize`]).
//! Search is exhaustive and O(n), which is fine for a few thousand reports.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use curbside_core::error::{CurbsideError, Result};

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The report the vector belongs to.
    pub id: Uuid,
    /// Inner product with the query (cosine similarity for unit vectors).
    pub score: f64,
}

/// A vector together with the canonical text it was embedded from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
}

/// A batch of changes applied under a single write lock.
///
/// The whole batch is validated before anything is mutated, so a failing
/// update leaves the index exactly as it was.
#[derive(Debug, Clone, Default)]
pub struct IndexUpdate {
    /// Unknown identifiers are appended; known ones are replaced in place.
    pub upserts: Vec<IndexEntry>,
    /// Identifiers to drop. Unknown identifiers are ignored.
    pub removals: Vec<Uuid>,
}

impl IndexUpdate {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

#[derive(Debug, Default)]
struct Entries {
    items: Vec<IndexEntry>,
    positions: HashMap<Uuid, usize>,
}

impl Entries {
    fn reindex(&mut self) {
        self.positions = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.id, pos))
            .collect();
    }

    fn push(&mut self, entry: IndexEntry) {
        self.positions.insert(entry.id, self.items.len());
        self.items.push(entry);
    }
}

/// Fixed-dimension vector index.
///
/// Thread-safe via an interior RwLock: searches share a read lock and see a
/// consistent snapshot, mutations take the write lock.
#[derive(Debug)]
pub struct VectorIndex {
    dimensions: usize,
    entries: RwLock<Entries>,
}

impl VectorIndex {
    /// Create an empty index accepting vectors of exactly `dimensions` floats.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|e| CurbsideError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|e| CurbsideError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(CurbsideError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Append a single entry.
    ///
    /// Fails with `DimensionMismatch` on a wrongly sized vector and with
    /// `DuplicateIdentifier` if the id is already indexed.
    pub fn insert(&self, id: Uuid, vector: Vec<f32>, text: impl Into<String>) -> Result<()> {
        self.check_dimensions(&vector)?;
        let mut entries = self.write()?;
        if entries.positions.contains_key(&id) {
            return Err(CurbsideError::DuplicateIdentifier(id));
        }
        entries.push(IndexEntry {
            id,
            vector,
            text: text.into(),
        });
        Ok(())
    }

    /// Apply removals, then upserts, atomically.
    pub fn apply(&self, update: IndexUpdate) -> Result<()> {
        self.validate_batch(&update.upserts)?;

        let mut entries = self.write()?;
        if !update.removals.is_empty() {
            let removed: HashSet<Uuid> = update.removals.into_iter().collect();
            entries.items.retain(|entry| !removed.contains(&entry.id));
            entries.reindex();
        }
        for entry in update.upserts {
            match entries.positions.get(&entry.id).copied() {
                Some(pos) => entries.items[pos] = entry,
                None => entries.push(entry),
            }
        }
        Ok(())
    }

    /// Discard every entry and load `items` in their given order.
    pub fn replace_all(&self, items: Vec<IndexEntry>) -> Result<()> {
        self.validate_batch(&items)?;

        let mut entries = self.write()?;
        entries.items = items;
        entries.reindex();
        Ok(())
    }

    fn validate_batch(&self, items: &[IndexEntry]) -> Result<()> {
        let mut seen = HashSet::with_capacity(items.len());
        for entry in items {
            self.check_dimensions(&entry.vector)?;
            if !seen.insert(entry.id) {
                return Err(CurbsideError::DuplicateIdentifier(entry.id));
            }
        }
        Ok(())
    }

    /// Return up to `k` hits by descending inner product.
    ///
    /// Equal scores keep insertion order. An empty index yields an empty list.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check_dimensions(query)?;
        let entries = self.read()?;

        let mut scored: Vec<SearchHit> = entries
            .items
            .iter()
            .map(|entry| SearchHit {
                id: entry.id,
                score: inner_product(query, &entry.vector),
            })
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);

        Ok(scored)
    }

    /// Like [`search`](Self::search), but an empty index is an error.
    pub fn search_non_empty(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty()? {
            return Err(CurbsideError::EmptyIndex);
        }
        self.search(query, k)
    }

    /// Return the number of vectors currently stored in the index.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.items.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, id: Uuid) -> Result<bool> {
        Ok(self.read()?.positions.contains_key(&id))
    }

    /// Copy of every entry in insertion order.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.read()?.items.clone())
    }
}

/// Scale a vector to unit L2 norm. A zero vector is returned unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector
        .iter()
        .map(|v| (*v as f64).powi(2))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in &mut vector {
            *v = (*v as f64 / norm) as f32;
        }
    }
    vector
}

fn inner_product(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

/// L2 norm, used by tests and sanity checks.
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|v| (*v as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}
