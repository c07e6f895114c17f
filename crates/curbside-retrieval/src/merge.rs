//! Merging filter results into the ranked candidate list.
//!
//! A filter that ran is recorded together with its match set, even when that
//! set is empty. A filter that did not run (not requested, or rejected as
//! invalid) is never recorded. The final list keeps the candidates that are
//! in every recorded set, in their original ranking order.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::filter::FilterField;

/// Which filters ran and what each one matched.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcomes {
    ran: Vec<(FilterField, HashSet<Uuid>)>,
}

/// Summary of one recorded filter, for result payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFilter {
    pub field: FilterField,
    pub matched: usize,
}

impl ToolOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `field` ran and matched `ids`.
    pub fn record(&mut self, field: FilterField, ids: impl IntoIterator<Item = Uuid>) {
        self.ran.push((field, ids.into_iter().collect()));
    }

    pub fn ran(&self, field: FilterField) -> bool {
        self.ran.iter().any(|(f, _)| *f == field)
    }

    pub fn is_empty(&self) -> bool {
        self.ran.is_empty()
    }

    pub fn applied(&self) -> Vec<AppliedFilter> {
        self.ran
            .iter()
            .map(|(field, ids)| AppliedFilter {
                field: *field,
                matched: ids.len(),
            })
            .collect()
    }

    /// Candidates present in every recorded set, ranking order preserved.
    /// With nothing recorded the candidates pass through unchanged.
    pub fn intersect(&self, candidates: &[Uuid]) -> Vec<Uuid> {
        candidates
            .iter()
            .filter(|id| self.ran.iter().all(|(_, ids)| ids.contains(*id)))
            .copied()
            .collect()
    }
}
