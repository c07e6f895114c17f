use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Labels
// =============================================================================

/// Normalize a free-form label: trim, case-fold, and map whitespace and
/// hyphens to underscores. "Missing Ramp" becomes "missing_ramp".
pub fn normalize_label(input: &str) -> String {
    input
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '-' {
                '_'
            } else {
                c
            }
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// A closed vocabulary of snake_case labels.
pub trait Label: Sized + Copy + 'static {
    /// Every member of the vocabulary, in display order.
    const ALL: &'static [Self];

    /// Canonical snake_case spelling.
    fn as_str(&self) -> &'static str;

    /// Parse after [`normalize_label`]. Returns `None` outside the vocabulary.
    fn parse_label(input: &str) -> Option<Self> {
        let normalized = normalize_label(input);
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == normalized)
    }

    /// Comma-separated list of every label, for error messages.
    fn vocabulary() -> String {
        Self::ALL
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Accessibility barrier category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BrokenSidewalk,
    CrackedSidewalk,
    MissingRamp,
    NoRamp,
    BlockedPath,
    ObstacleOnPath,
    SteepGrade,
    PoorLighting,
    NarrowPassage,
    UnevenSurface,
    SlipperySurface,
    Pothole,
    OvergrownVegetation,
    ParkingViolation,
    Other,
}

impl Label for Category {
    const ALL: &'static [Self] = &[
        Category::BrokenSidewalk,
        Category::CrackedSidewalk,
        Category::MissingRamp,
        Category::NoRamp,
        Category::BlockedPath,
        Category::ObstacleOnPath,
        Category::SteepGrade,
        Category::PoorLighting,
        Category::NarrowPassage,
        Category::UnevenSurface,
        Category::SlipperySurface,
        Category::Pothole,
        Category::OvergrownVegetation,
        Category::ParkingViolation,
        Category::Other,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Category::BrokenSidewalk => "broken_sidewalk",
            Category::CrackedSidewalk => "cracked_sidewalk",
            Category::MissingRamp => "missing_ramp",
            Category::NoRamp => "no_ramp",
            Category::BlockedPath => "blocked_path",
            Category::ObstacleOnPath => "obstacle_on_path",
            Category::SteepGrade => "steep_grade",
            Category::PoorLighting => "poor_lighting",
            Category::NarrowPassage => "narrow_passage",
            Category::UnevenSurface => "uneven_surface",
            Category::SlipperySurface => "slippery_surface",
            Category::Pothole => "pothole",
            Category::OvergrownVegetation => "overgrown_vegetation",
            Category::ParkingViolation => "parking_violation",
            Category::Other => "other",
        }
    }
}

/// Barrier severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Label for Severity {
    const ALL: &'static [Self] = &[Severity::Low, Severity::Medium, Severity::High];

    fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Resolution status of a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Open,
    Acknowledged,
    InProgress,
    Resolved,
}

impl Label for ReportStatus {
    const ALL: &'static [Self] = &[
        ReportStatus::Draft,
        ReportStatus::Open,
        ReportStatus::Acknowledged,
        ReportStatus::InProgress,
        ReportStatus::Resolved,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Open => "open",
            ReportStatus::Acknowledged => "acknowledged",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Resolved => "resolved",
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// A WGS84 point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Descriptive fields of a report. Every field is optional: drafts produced
/// by image analysis are often incomplete.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportContent {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Stored verbatim; not guaranteed to be a known [`Category`].
    pub category: Option<String>,
    pub severity: Option<String>,
    pub suggested_fix: Option<String>,
}

/// A barrier report as held by the record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    /// Fields confirmed by the reporter.
    #[serde(default)]
    pub content: ReportContent,
    /// Machine-generated draft, consulted when a confirmed field is missing.
    #[serde(default)]
    pub ai_draft: Option<ReportContent>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub location: Option<Coordinates>,
    pub created_at: DateTime<Utc>,
}

fn default_status() -> String {
    ReportStatus::Open.as_str().to_string()
}

impl Report {
    /// Create a report with empty content, `open` status and no location.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            content: ReportContent::default(),
            ai_draft: None,
            status: default_status(),
            location: None,
            created_at: Utc::now(),
        }
    }

    /// Resolve a content field, falling back to the draft when the confirmed
    /// value is missing or blank.
    pub fn field<'a, F>(&'a self, pick: F) -> Option<&'a str>
    where
        F: Fn(&'a ReportContent) -> &'a Option<String>,
    {
        let confirmed = pick(&self.content).as_deref().filter(|s| !s.is_empty());
        confirmed.or_else(|| {
            self.ai_draft
                .as_ref()
                .and_then(|draft| pick(draft).as_deref())
                .filter(|s| !s.is_empty())
        })
    }
}

/// Conjunctive predicate over stored report fields. `None` matches anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub category: Option<Category>,
    pub severity: Option<Severity>,
    pub status: Option<ReportStatus>,
}
