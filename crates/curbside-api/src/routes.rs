//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use curbside_core::config::CurbsideConfig;
use curbside_core::error::{CurbsideError, Result};

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/search", post(handlers::search))
        .route("/search/semantic", get(handlers::search_semantic))
        .route("/index/sync", post(handlers::sync_index))
        .route("/index/size", get(handlers::index_size))
        .route("/filters/category/{value}", get(handlers::filter_category))
        .route("/filters/severity/{value}", get(handlers::filter_severity))
        .route("/filters/status/{value}", get(handlers::filter_status))
        .route("/filters/location", get(handlers::filter_location))
        .route("/stats", get(handlers::stats))
        .route("/reports/debug", get(handlers::debug_reports))
        .route("/reports", post(handlers::create_report))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind to `general.port` on all interfaces and serve until the process
/// exits.
pub async fn start_server(config: &CurbsideConfig, state: AppState) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CurbsideError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| CurbsideError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
