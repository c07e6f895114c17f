//! SQLite-backed report repository.
//!
//! `ReportRepository` is the concrete record source: it lists bounded
//! snapshots, looks reports up by id, evaluates field filters in SQL, and
//! computes aggregate statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use curbside_core::error::{CurbsideError, Result};
use curbside_core::types::{Coordinates, Label, Report, ReportContent, ReportFilter};
use curbside_core::ReportSource;

use crate::db::Database;

const REPORT_COLUMNS: &str = "id, title, description, category, severity, suggested_fix, \
                              ai_draft, status, latitude, longitude, created_at";

/// Aggregate counts over all stored reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStats {
    pub total: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

/// Repository for barrier reports.
#[derive(Debug, Clone)]
pub struct ReportRepository {
    db: Arc<Database>,
    list_limit: usize,
    filter_limit: usize,
}

impl ReportRepository {
    /// Create a repository with page sizes for listings and filter results.
    pub fn new(db: Arc<Database>, list_limit: usize, filter_limit: usize) -> Self {
        Self {
            db,
            list_limit,
            filter_limit,
        }
    }

    /// Insert or replace a report.
    pub fn save(&self, report: &Report) -> Result<()> {
        let ai_draft = report
            .ai_draft
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO reports (id, title, description, category, severity,
                     suggested_fix, ai_draft, status, latitude, longitude, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    report.id.to_string(),
                    report.content.title,
                    report.content.description,
                    report.content.category,
                    report.content.severity,
                    report.content.suggested_fix,
                    ai_draft,
                    report.status,
                    report.location.map(|c| c.lat),
                    report.location.map(|c| c.lng),
                    report.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CurbsideError::Storage(format!("Failed to save report: {}", e)))?;
            Ok(())
        })
    }

    /// Find a report by id.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Report>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS);
            let row = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_report(row))
                })
                .optional()
                .map_err(|e| CurbsideError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Count all stored reports.
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
                .map_err(|e| CurbsideError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Counts by category, severity and status. Missing values count as
    /// `other`, `medium` and `open` respectively.
    pub fn stats(&self) -> Result<ReportStats> {
        self.db.with_conn(|conn| {
            let mut stats = ReportStats::default();
            for (column, fallback) in [
                ("category", "other"),
                ("severity", "medium"),
                ("status", "open"),
            ] {
                let sql = format!(
                    "SELECT COALESCE(NULLIF({col}, ''), '{fallback}') AS label, COUNT(*)
                     FROM reports GROUP BY label",
                    col = column,
                    fallback = fallback
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| CurbsideError::Storage(e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                    .map_err(|e| CurbsideError::Storage(e.to_string()))?;

                let bucket = match column {
                    "category" => &mut stats.by_category,
                    "severity" => &mut stats.by_severity,
                    _ => &mut stats.by_status,
                };
                for row in rows {
                    let (label, count) = row.map_err(|e| CurbsideError::Storage(e.to_string()))?;
                    bucket.insert(label, count as u64);
                }
            }
            stats.total = stats.by_status.values().sum();
            Ok(stats)
        })
    }

    fn query_reports(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Report>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| CurbsideError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params, |row| Ok(row_to_report(row)))
                .map_err(|e| CurbsideError::Storage(e.to_string()))?;

            let mut reports = Vec::new();
            for row in rows {
                reports.push(row.map_err(|e| CurbsideError::Storage(e.to_string()))??);
            }
            Ok(reports)
        })
    }
}

impl ReportSource for ReportRepository {
    fn list_reports(&self) -> Result<Vec<Report>> {
        let sql = format!(
            "SELECT {} FROM reports ORDER BY created_at DESC, id ASC LIMIT ?1",
            REPORT_COLUMNS
        );
        self.query_reports(&sql, &[&(self.list_limit as i64)])
    }

    fn get_reports(&self, ids: &[Uuid]) -> Result<Vec<Report>> {
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(report) = self.find_by_id(*id)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    fn filter_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let sql = format!(
            "SELECT {} FROM reports
             WHERE (?1 IS NULL OR category = ?1)
               AND (?2 IS NULL OR severity = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at DESC, id ASC
             LIMIT ?4",
            REPORT_COLUMNS
        );
        let category = filter.category.map(|c| c.as_str());
        let severity = filter.severity.map(|s| s.as_str());
        let status = filter.status.map(|s| s.as_str());
        self.query_reports(
            &sql,
            &[&category, &severity, &status, &(self.filter_limit as i64)],
        )
    }
}

/// Map a `reports` row to a [`Report`].
fn row_to_report(row: &Row<'_>) -> Result<Report> {
    let storage = |e: rusqlite::Error| CurbsideError::Storage(e.to_string());

    let id_str: String = row.get(0).map_err(storage)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| CurbsideError::Storage(format!("Invalid report id '{}': {}", id_str, e)))?;

    let ai_draft: Option<String> = row.get(6).map_err(storage)?;
    let ai_draft = ai_draft
        .as_deref()
        .map(serde_json::from_str::<ReportContent>)
        .transpose()?;

    let latitude: Option<f64> = row.get(8).map_err(storage)?;
    let longitude: Option<f64> = row.get(9).map_err(storage)?;
    let location = match (latitude, longitude) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    };

    let created_ms: i64 = row.get(10).map_err(storage)?;
    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| CurbsideError::Storage(format!("Invalid timestamp: {}", created_ms)))?;

    Ok(Report {
        id,
        content: ReportContent {
            title: row.get(1).map_err(storage)?,
            description: row.get(2).map_err(storage)?,
            category: row.get(3).map_err(storage)?,
            severity: row.get(4).map_err(storage)?,
            suggested_fix: row.get(5).map_err(storage)?,
        },
        ai_draft,
        status: row.get(7).map_err(storage)?,
        location,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use curbside_core::types::{Category, ReportStatus, Severity};

    fn make_repo() -> ReportRepository {
        ReportRepository::new(Arc::new(Database::in_memory().unwrap()), 100, 500)
    }

    fn make_report(title: &str, category: &str, severity: &str, status: &str) -> Report {
        let mut report = Report::new(Uuid::new_v4());
        report.content.title = Some(title.to_string());
        report.content.category = Some(category.to_string());
        report.content.severity = Some(severity.to_string());
        report.status = status.to_string();
        report
    }

    #[test]
    fn test_save_and_find() {
        let repo = make_repo();
        let mut report = make_report("Missing ramp", "missing_ramp", "high", "open");
        report.location = Some(Coordinates { lat: 43.66, lng: -79.39 });
        report.ai_draft = Some(ReportContent {
            suggested_fix: Some("Install a ramp".to_string()),
            ..Default::default()
        });
        repo.save(&report).unwrap();

        let found = repo.find_by_id(report.id).unwrap().unwrap();
        assert_eq!(found.content, report.content);
        assert_eq!(found.ai_draft, report.ai_draft);
        assert_eq!(found.location, report.location);
        assert_eq!(found.status, "open");
        assert_eq!(
            found.created_at.timestamp_millis(),
            report.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_find_missing_returns_none() {
        let repo = make_repo();
        assert!(repo.find_by_id(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_existing() {
        let repo = make_repo();
        let mut report = make_report("Old", "other", "low", "open");
        repo.save(&report).unwrap();
        report.content.title = Some("New".to_string());
        repo.save(&report).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        let found = repo.find_by_id(report.id).unwrap().unwrap();
        assert_eq!(found.content.title.as_deref(), Some("New"));
    }

    #[test]
    fn test_list_is_newest_first_and_bounded() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = ReportRepository::new(Arc::clone(&db), 2, 500);
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut report = make_report(&format!("r{}", i), "other", "low", "open");
            report.created_at = base + Duration::seconds(i);
            repo.save(&report).unwrap();
            ids.push(report.id);
        }

        let listed = repo.list_reports().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);
        assert_eq!(listed[1].id, ids[1]);
    }

    #[test]
    fn test_get_reports_skips_unknown_and_keeps_order() {
        let repo = make_repo();
        let a = make_report("a", "other", "low", "open");
        let b = make_report("b", "other", "low", "open");
        repo.save(&a).unwrap();
        repo.save(&b).unwrap();

        let fetched = repo.get_reports(&[b.id, Uuid::new_v4(), a.id]).unwrap();
        let ids: Vec<Uuid> = fetched.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn test_filter_by_fields() {
        let repo = make_repo();
        let ramp = make_report("ramp", "missing_ramp", "high", "open");
        let light = make_report("light", "poor_lighting", "low", "resolved");
        let ramp_low = make_report("ramp2", "missing_ramp", "low", "in_progress");
        for r in [&ramp, &light, &ramp_low] {
            repo.save(r).unwrap();
        }

        let by_category = repo
            .filter_reports(&ReportFilter {
                category: Some(Category::MissingRamp),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_category.len(), 2);

        let combined = repo
            .filter_reports(&ReportFilter {
                category: Some(Category::MissingRamp),
                severity: Some(Severity::Low),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].id, ramp_low.id);

        let by_status = repo
            .filter_reports(&ReportFilter {
                status: Some(ReportStatus::Resolved),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].id, light.id);

        let everything = repo.filter_reports(&ReportFilter::default()).unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn test_stats_with_defaults() {
        let repo = make_repo();
        repo.save(&make_report("a", "missing_ramp", "high", "open")).unwrap();
        repo.save(&make_report("b", "missing_ramp", "low", "resolved")).unwrap();
        let mut bare = Report::new(Uuid::new_v4());
        bare.content.title = Some("bare".to_string());
        repo.save(&bare).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_category.get("missing_ramp"), Some(&2));
        assert_eq!(stats.by_category.get("other"), Some(&1));
        assert_eq!(stats.by_severity.get("medium"), Some(&1));
        assert_eq!(stats.by_status.get("open"), Some(&2));
        assert_eq!(stats.by_status.get("resolved"), Some(&1));
    }
}
