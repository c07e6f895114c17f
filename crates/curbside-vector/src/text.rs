//! Canonical text of a report: the string that gets embedded and that the
//! synchronizer compares to decide whether a report needs re-embedding.

use curbside_core::types::Report;

/// Derive the canonical text of a report.
///
/// Layout: `"{title}. {category}. {severity} severity. {description} {fix}"`,
/// trimmed. Category delimiters become spaces. Each field falls back to the
/// AI draft and then to an empty segment, so this never fails.
pub fn canonical_text(report: &Report) -> String {
    let title = report.field(|c| &c.title).unwrap_or_default();
    let category = report
        .field(|c| &c.category)
        .unwrap_or_default()
        .replace(['_', '-'], " ");
    let severity = report.field(|c| &c.severity).unwrap_or_default();
    let description = report.field(|c| &c.description).unwrap_or_default();
    let fix = report.field(|c| &c.suggested_fix).unwrap_or_default();

    format!(
        "{}. {}. {} severity. {} {}",
        title, category, severity, description, fix
    )
    .trim()
    .to_string()
}
