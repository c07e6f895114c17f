//! Record-source collaborator boundary.
//!
//! The retrieval core only ever reads snapshots of reports; persistence and
//! listing belong to whatever implements [`ReportSource`].

use uuid::Uuid;

use crate::error::Result;
use crate::types::{Report, ReportFilter};

/// Read access to the report store.
pub trait ReportSource: Send + Sync {
    /// List a bounded page of reports, newest first.
    fn list_reports(&self) -> Result<Vec<Report>>;

    /// Fetch the given reports. Unknown identifiers are skipped; order follows `ids`.
    fn get_reports(&self, ids: &[Uuid]) -> Result<Vec<Report>>;

    /// Reports whose stored fields match every set predicate of `filter`.
    fn filter_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>>;
}
