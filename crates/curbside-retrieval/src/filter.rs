//! Filter evaluators: categorical and geographic lookups against the report
//! store, each returning the set of matching report ids.
//!
//! Invalid input is not an error. It yields [`FilterOutcome::Invalid`] with a
//! message listing the accepted values, so callers can report it and move on.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use curbside_core::error::Result;
use curbside_core::source::ReportSource;
use curbside_core::types::{Category, Coordinates, Label, ReportFilter, ReportStatus, Severity};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// The field a filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Category,
    Severity,
    Status,
    Location,
}

impl FilterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::Category => "category",
            FilterField::Severity => "severity",
            FilterField::Status => "status",
            FilterField::Location => "location",
        }
    }
}

impl std::fmt::Display for FilterField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter value that was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidFilter {
    pub field: FilterField,
    pub value: String,
    pub error: String,
}

/// Reports matching a categorical filter, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterMatch {
    pub field: FilterField,
    /// The normalized value that was looked up.
    pub value: String,
    pub ids: Vec<Uuid>,
    pub count: usize,
}

/// Reports within a radius of a point, nearest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationMatch {
    pub center: Coordinates,
    pub radius_km: f64,
    pub ids: Vec<Uuid>,
    /// Distance in kilometres, rounded to metres.
    pub distances: BTreeMap<Uuid, f64>,
    pub count: usize,
}

/// Result of a filter lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome<M = FilterMatch> {
    Matched(M),
    Invalid(InvalidFilter),
}

impl<M> FilterOutcome<M> {
    pub fn is_valid(&self) -> bool {
        matches!(self, FilterOutcome::Matched(_))
    }
}

impl FilterOutcome<FilterMatch> {
    /// Matching ids; empty for an invalid filter.
    pub fn ids(&self) -> &[Uuid] {
        match self {
            FilterOutcome::Matched(m) => &m.ids,
            FilterOutcome::Invalid(_) => &[],
        }
    }
}

/// Runs filter lookups against a [`ReportSource`].
#[derive(Clone)]
pub struct FilterEvaluator {
    source: Arc<dyn ReportSource>,
}

impl FilterEvaluator {
    pub fn new(source: Arc<dyn ReportSource>) -> Self {
        Self { source }
    }

    pub fn by_category(&self, raw: &str) -> Result<FilterOutcome> {
        self.lookup::<Category>(FilterField::Category, raw, |category| ReportFilter {
            category: Some(category),
            ..Default::default()
        })
    }

    pub fn by_severity(&self, raw: &str) -> Result<FilterOutcome> {
        self.lookup::<Severity>(FilterField::Severity, raw, |severity| ReportFilter {
            severity: Some(severity),
            ..Default::default()
        })
    }

    pub fn by_status(&self, raw: &str) -> Result<FilterOutcome> {
        self.lookup::<ReportStatus>(FilterField::Status, raw, |status| ReportFilter {
            status: Some(status),
            ..Default::default()
        })
    }

    /// Dispatch a categorical filter by field. `Location` takes coordinates
    /// and is rejected here.
    pub fn by_field(&self, field: FilterField, raw: &str) -> Result<FilterOutcome> {
        match field {
            FilterField::Category => self.by_category(raw),
            FilterField::Severity => self.by_severity(raw),
            FilterField::Status => self.by_status(raw),
            FilterField::Location => Ok(FilterOutcome::Invalid(InvalidFilter {
                field,
                value: raw.to_string(),
                error: "Location filters take lat, lng and radius_km".to_string(),
            })),
        }
    }

    fn lookup<L: Label>(
        &self,
        field: FilterField,
        raw: &str,
        to_filter: impl FnOnce(L) -> ReportFilter,
    ) -> Result<FilterOutcome> {
        let Some(label) = L::parse_label(raw) else {
            return Ok(FilterOutcome::Invalid(InvalidFilter {
                field,
                value: raw.to_string(),
                error: format!(
                    "Invalid {} '{}'. Must be one of: {}",
                    field,
                    raw,
                    L::vocabulary()
                ),
            }));
        };

        let reports = self.source.filter_reports(&to_filter(label))?;
        let ids: Vec<Uuid> = reports.iter().map(|r| r.id).collect();
        debug!(field = %field, value = label.as_str(), count = ids.len(), "Filter evaluated");

        Ok(FilterOutcome::Matched(FilterMatch {
            field,
            value: label.as_str().to_string(),
            count: ids.len(),
            ids,
        }))
    }

    /// Reports within `radius_km` of (`lat`, `lng`) by great-circle distance.
    ///
    /// Reports without coordinates are skipped. Scans the listing snapshot.
    pub fn by_location(&self, lat: f64, lng: f64, radius_km: f64) -> Result<FilterOutcome<LocationMatch>> {
        let invalid = |error: &str| -> Result<FilterOutcome<LocationMatch>> {
            Ok(FilterOutcome::Invalid(InvalidFilter {
                field: FilterField::Location,
                value: format!("{},{} r={}", lat, lng, radius_km),
                error: error.to_string(),
            }))
        };
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return invalid("Latitude must be within [-90, 90] and longitude within [-180, 180]");
        }
        if !radius_km.is_finite() || radius_km < 0.0 {
            return invalid("radius_km must be a non-negative number");
        }

        let center = Coordinates { lat, lng };
        let mut within: Vec<(Uuid, f64)> = self
            .source
            .list_reports()?
            .iter()
            .filter_map(|report| {
                let at = report.location?;
                let distance = haversine_km(center, at);
                (distance <= radius_km).then_some((report.id, distance))
            })
            .collect();
        within.sort_by(|a, b| a.1.total_cmp(&b.1));

        debug!(count = within.len(), radius_km, "Location filter evaluated");
        Ok(FilterOutcome::Matched(LocationMatch {
            center,
            radius_km,
            ids: within.iter().map(|(id, _)| *id).collect(),
            distances: within
                .iter()
                .map(|(id, d)| (*id, (d * 1000.0).round() / 1000.0))
                .collect(),
            count: within.len(),
        }))
    }
}

impl std::fmt::Debug for FilterEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEvaluator").finish()
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lng - a.lng).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}
