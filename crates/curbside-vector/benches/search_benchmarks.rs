//! Benchmarks for exhaustive similarity search.
//!
//! Uses 1,000 reports by default. Set `BENCH_FULL_SCALE=1` to index 20,000:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p curbside-vector
//! ```

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use uuid::Uuid;

use curbside_core::types::{Report, ReportContent};
use curbside_vector::embedding::{EmbeddingService, MockEmbedding};
use curbside_vector::{IndexSynchronizer, SearchEngine, VectorIndex};

const CI_REPORT_COUNT: usize = 1_000;
const FULL_SCALE_REPORT_COUNT: usize = 20_000;

const CATEGORIES: &[&str] = &[
    "no_ramp",
    "cracked_sidewalk",
    "obstacle_on_path",
    "poor_lighting",
    "pothole",
    "steep_grade",
];

fn report_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_REPORT_COUNT
    } else {
        CI_REPORT_COUNT
    }
}

fn generate_report(index: usize) -> Report {
    let mut report = Report::new(Uuid::new_v4());
    report.content = ReportContent {
        title: Some(format!("Barrier number {}", index)),
        description: Some(format!(
            "Reported near block {} of the main street, close to the bus stop and the pharmacy entrance.",
            index % 97
        )),
        category: Some(CATEGORIES[index % CATEGORIES.len()].to_string()),
        severity: Some(["low", "medium", "high"][index % 3].to_string()),
        suggested_fix: None,
    };
    report
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

/// Build an index of `count` generated reports through the synchronizer.
fn build_populated(count: usize) -> (Arc<VectorIndex>, IndexSynchronizer, Vec<Report>) {
    let index = Arc::new(VectorIndex::new(MockEmbedding::DEFAULT_DIMENSIONS));
    let sync = IndexSynchronizer::new(Arc::clone(&index), Arc::new(MockEmbedding::new()));
    let reports: Vec<Report> = (0..count).map(generate_report).collect();

    runtime()
        .block_on(sync.synchronize(&reports, false))
        .expect("sync failed");
    assert_eq!(index.len().expect("index readable"), count, "Index should contain all reports");
    (index, sync, reports)
}

fn bench_index_search(c: &mut Criterion) {
    let count = report_count();
    let (index, _sync, _reports) = build_populated(count);
    let rt = runtime();
    let query = curbside_vector::index::normalize(
        rt.block_on(MockEmbedding::new().embed_query("steep ramp near the pharmacy"))
            .expect("query embed failed"),
    );

    let mut group = c.benchmark_group("index_search");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top15_{}reports", count), |b| {
        b.iter(|| index.search(&query, 15).expect("search failed"));
    });

    group.finish();
}

fn bench_search_similar(c: &mut Criterion) {
    let count = report_count();
    let (index, _sync, _reports) = build_populated(count);
    let engine = SearchEngine::new(index, Arc::new(MockEmbedding::new()));
    let rt = runtime();

    let mut group = c.benchmark_group("search_similar");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("threshold_0.5_{}reports", count), |b| {
        b.iter(|| {
            rt.block_on(engine.search_similar("pothole on main street", 15, 0.5))
                .expect("search failed")
        });
    });

    group.finish();
}

/// A pass over an unchanged snapshot must not embed anything; this measures
/// the cost of canonical text plus the dirty check alone.
fn bench_noop_sync(c: &mut Criterion) {
    let count = report_count();
    let (_index, sync, reports) = build_populated(count);
    let rt = runtime();

    let mut group = c.benchmark_group("synchronize");
    group.sample_size(50);

    group.bench_function(format!("unchanged_{}reports", count), |b| {
        b.iter(|| {
            let outcome = rt
                .block_on(sync.synchronize(&reports, false))
                .expect("sync failed");
            assert_eq!(outcome.embedded, 0);
            outcome
        });
    });

    group.finish();
}

criterion_group!(benches, bench_index_search, bench_search_similar, bench_noop_sync);
criterion_main!(benches);
