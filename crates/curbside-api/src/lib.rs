//! Curbside API crate - axum HTTP server and route handlers.
//!
//! Exposes the retrieval pipeline, direct semantic search, index
//! synchronization, the filter lookups and a few store utilities as a JSON
//! REST API.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
