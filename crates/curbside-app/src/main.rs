//! Curbside application binary - composition root.
//!
//! 1. Load and validate configuration
//! 2. Build the embedding and text-generation collaborators (fail fast)
//! 3. Open the SQLite report store
//! 4. Build the index and synchronize it once
//! 5. Start the axum REST API server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use curbside_api::routes;
use curbside_api::state::AppState;
use curbside_core::config::CurbsideConfig;
use curbside_core::error::CurbsideError;
use curbside_retrieval::generator_from_config;
use curbside_storage::{Database, ReportRepository};
use curbside_vector::embedding_from_config;

use cli::CliArgs;

/// Expand ~ to the home directory.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    match data_dir.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(data_dir),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config, with CLI overrides.
    let config_file = args.resolve_config_path();
    let mut config = CurbsideConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.general.port = args.resolve_port(config.general.port);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);
    if args.offline {
        config.embedding.provider = "mock".to_string();
        config.generation.provider = "disabled".to_string();
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Curbside v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");
    config.validate()?;

    // Collaborators. Missing credentials or model files stop startup here.
    let embedder = embedding_from_config(&config.embedding)?;
    if embedder.dimensions() != config.embedding.dimensions {
        return Err(CurbsideError::Config(format!(
            "embedding provider '{}' produces {}-dimensional vectors but embedding.dimensions is {}",
            config.embedding.provider,
            embedder.dimensions(),
            config.embedding.dimensions
        ))
        .into());
    }
    tracing::info!(
        provider = %config.embedding.provider,
        dimensions = embedder.dimensions(),
        "Embedding service ready"
    );
    let generator = generator_from_config(&config.generation)?;
    tracing::info!(provider = %config.generation.provider, "Text generation ready");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("curbside.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    let repository = ReportRepository::new(
        Arc::new(db),
        config.storage.list_limit,
        config.storage.filter_limit,
    );

    let state = AppState::new(config.clone(), repository, embedder, generator);

    // A failed startup sync is retried lazily by the first search.
    match state.pipeline.synchronize(args.rebuild).await {
        Ok(outcome) => tracing::info!(
            indexed = outcome.indexed,
            embedded = outcome.embedded,
            rebuilt = outcome.rebuilt,
            "Startup index build complete"
        ),
        Err(e) => tracing::warn!(error = %e, "Startup index build failed"),
    }

    routes::start_server(&config, state).await?;

    Ok(())
}
