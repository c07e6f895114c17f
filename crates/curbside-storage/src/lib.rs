//! Curbside Storage crate - SQLite report store.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `ReportRepository`, which implements the `ReportSource` boundary the
//! retrieval core reads from.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ReportRepository, ReportStats};
