//! Curbside vector crate: vector index, canonical text, index synchronizer,
//! embedding services and similarity search.
//!
//! Provides an in-memory exact-search index over unit vectors, an embedding
//! service trait with HTTP, ONNX and mock implementations, and the
//! synchronizer that keeps the index in step with the report store.

pub mod embedding;
pub mod index;
pub mod search;
pub mod sync;
pub mod text;

pub use embedding::{embedding_from_config, DynEmbeddingService, EmbeddingService, MockEmbedding};
pub use index::{IndexEntry, IndexUpdate, SearchHit, VectorIndex};
pub use search::{SearchEngine, SemanticMatches};
pub use sync::{IndexSynchronizer, SyncOutcome};
pub use text::canonical_text;
