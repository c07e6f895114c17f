//! Embedding service trait and implementations.
//!
//! - `HttpEmbeddingService` calls an OpenAI-compatible `/embeddings` endpoint.
//!   This is the default production backend.
//! - `OnnxEmbeddingService` runs a local sentence-transformer ONNX model (e.g.
//!   all-MiniLM-L6-v2) via ort, tokenized with the HuggingFace tokenizers crate.
//! - `MockEmbedding` hashes words into buckets. Texts sharing words get similar
//!   vectors, which is enough for tests and offline runs.
//!
//! Providers return raw vectors. Normalization happens in the synchronizer and
//! in similarity search.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ort::session::Session;
use ort::value::TensorRef;
use reqwest::Client;
use serde_json::Value;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use curbside_core::config::{require_env, EmbeddingConfig};
use curbside_core::error::{CurbsideError, Result};

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Reports are
/// embedded in batches during synchronization; queries one at a time.
pub trait EmbeddingService: Send + Sync {
    /// Embed every text, returning one vector per input in input order.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// Embed a single search query.
    fn embed_query(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Boxed future returned by [`DynEmbeddingService`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService` returns `impl Future` and so cannot be made into a trait
/// object. A blanket implementation is provided so that every
/// `EmbeddingService` automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;

    fn embed_query_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn embed_query_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.embed_query(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Reject a provider vector holding NaN or infinite components, which would
/// survive normalization and outrank every finite score.
pub fn ensure_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|v| !v.is_finite()) {
        Some(pos) => Err(CurbsideError::Embedding(format!(
            "embedding service returned a non-finite value at component {}",
            pos
        ))),
        None => Ok(()),
    }
}

/// Build the embedding provider named by `embedding.provider`.
///
/// Fails fast with a configuration error on an unknown provider, a missing
/// credential, or missing model files.
pub fn embedding_from_config(cfg: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>> {
    match cfg.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbeddingService::from_config(cfg)?)),
        "onnx" => {
            let dir = expand_home(&cfg.model_dir);
            Ok(Arc::new(OnnxEmbeddingService::from_directory(Path::new(&dir))?))
        }
        "mock" => Ok(Arc::new(MockEmbedding::with_dimensions(cfg.dimensions))),
        other => Err(CurbsideError::Config(format!(
            "unknown embedding provider '{}' (expected http, onnx or mock)",
            other
        ))),
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home, rest),
        _ => path.to_string(),
    }
}

// ---------------------------------------------------------------------------
// HttpEmbeddingService - OpenAI-compatible embeddings endpoint
// ---------------------------------------------------------------------------

/// Embedding client for any OpenAI-compatible `/embeddings` API.
pub struct HttpEmbeddingService {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    dimensions: usize,
    batch_size: usize,
}

impl std::fmt::Debug for HttpEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingService")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl HttpEmbeddingService {
    /// Read the API key from `cfg.api_key_env` and build the client.
    pub fn from_config(cfg: &EmbeddingConfig) -> Result<Self> {
        let api_key = require_env(&cfg.api_key_env)?;
        Self::new(cfg, api_key)
    }

    pub fn new(cfg: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| CurbsideError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.path),
            model: cfg.model.clone(),
            api_key,
            dimensions: cfg.dimensions,
            batch_size: cfg.batch_size.max(1),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CurbsideError::Embedding(format!("request failed: {}", e)))?;
        let json: Value = res
            .error_for_status()
            .map_err(|e| CurbsideError::Embedding(format!("provider returned error: {}", e)))?
            .json()
            .await
            .map_err(|e| CurbsideError::Embedding(format!("invalid response body: {}", e)))?;

        let vectors = parse_embedding_response(json)?;
        if vectors.len() != texts.len() {
            return Err(CurbsideError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

impl EmbeddingService for HttpEmbeddingService {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            debug!(count = chunk.len(), "Requesting embeddings");
            vectors.extend(self.request(chunk).await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| CurbsideError::Embedding("provider returned no vector".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| CurbsideError::Embedding("response is missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CurbsideError::Embedding("item missing embedding array".to_string()))?;
        let vector = embedding
            .iter()
            .map(|value| {
                value
                    .as_f64()
                    .map(|n| n as f32)
                    .ok_or_else(|| CurbsideError::Embedding("embedding value must be numeric".to_string()))
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - local ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding service using a sentence-transformer model.
///
/// Expects a model directory containing `model.onnx` and `tokenizer.json`.
/// The model takes `input_ids`, `attention_mask` and `token_type_ids` and
/// produces token embeddings; masked mean pooling yields one vector per text.
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

// ort::Session is Send + Sync internally (uses Arc<SharedSessionInner>).
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path) -> Result<Self> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(CurbsideError::Config(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(CurbsideError::Config(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| CurbsideError::Config(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| CurbsideError::Config(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| CurbsideError::Config(format!("ONNX load model: {}", e)))?;

        // Output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| CurbsideError::Config(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    async fn run_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        // Inference is CPU-bound; keep it off the async workers.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);

        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| embed_one(&session, &tokenizer, text))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| CurbsideError::Embedding(format!("Embedding task panicked: {}", e)))?
    }
}

/// Tokenize, run inference, and mean-pool the output of one text.
fn embed_one(session: &Mutex<Session>, tokenizer: &Tokenizer, text: &str) -> Result<Vec<f32>> {
    if text.is_empty() {
        return Err(CurbsideError::Embedding("Cannot embed empty text".to_string()));
    }

    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| CurbsideError::Embedding(format!("Tokenization failed: {}", e)))?;

    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();
    let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
    let seq_len = input_ids.len();

    let as_array = |name: &str, values: Vec<i64>| {
        ndarray::Array2::from_shape_vec((1, seq_len), values)
            .map_err(|e| CurbsideError::Embedding(format!("{} array: {}", name, e)))
    };
    let ids_array = as_array("input_ids", input_ids)?;
    let mask_array = as_array("attention_mask", attention_mask.clone())?;
    let type_array = as_array("token_type_ids", token_type_ids)?;

    let ids_ref = TensorRef::from_array_view(&ids_array)
        .map_err(|e| CurbsideError::Embedding(format!("TensorRef input_ids: {}", e)))?;
    let mask_ref = TensorRef::from_array_view(&mask_array)
        .map_err(|e| CurbsideError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
    let type_ref = TensorRef::from_array_view(&type_array)
        .map_err(|e| CurbsideError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

    let mut session = session
        .lock()
        .map_err(|e| CurbsideError::Embedding(format!("Session lock poisoned: {}", e)))?;
    let outputs = session
        .run(ort::inputs![ids_ref, mask_ref, type_ref])
        .map_err(|e| CurbsideError::Embedding(format!("ONNX inference failed: {}", e)))?;

    // Flat token embeddings: [1, seq_len, hidden_dim].
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| CurbsideError::Embedding(format!("Extract embeddings: {}", e)))?;

    let shape_dims: Vec<i64> = shape.iter().copied().collect();
    let hidden_dim = match shape_dims.as_slice() {
        [.., _, last] if *last > 0 => *last as usize,
        _ => {
            return Err(CurbsideError::Embedding(format!(
                "Unexpected output shape: {:?}",
                shape_dims
            )))
        }
    };

    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;
    for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
        if mask_val > 0 {
            let offset = tok_idx * hidden_dim;
            for (dim, slot) in pooled.iter_mut().enumerate() {
                *slot += data[offset + dim];
            }
            count += 1.0;
        }
    }
    if count > 0.0 {
        for val in &mut pooled {
            *val /= count;
        }
    }

    Ok(pooled)
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.run_blocking(texts.to_vec()).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.run_blocking(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| CurbsideError::Embedding("model returned no vector".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic lexical vectors for testing
// ---------------------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "in", "is", "it", "no", "of", "on", "or", "the", "there",
    "this", "to", "with",
];

/// Call counters shared by clones of a [`MockEmbedding`].
#[derive(Debug, Default)]
struct MockCounters {
    batch_calls: AtomicUsize,
    query_calls: AtomicUsize,
    texts_embedded: AtomicUsize,
    failing: AtomicBool,
}

/// Mock embedding service based on feature hashing.
///
/// Each lowercase alphanumeric word (minus a few stopwords) adds 1.0 to the
/// bucket chosen by its FNV-1a hash. Identical inputs always produce identical
/// outputs, and texts that share words have a positive cosine similarity.
/// Vectors are not normalized. Clones share call counters, so tests can
/// observe how often the synchronizer actually embedded.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    counters: Arc<MockCounters>,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub const DEFAULT_DIMENSIONS: usize = 384;

    pub fn new() -> Self {
        Self::with_dimensions(Self::DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Number of `embed_batch` calls so far.
    pub fn batch_calls(&self) -> usize {
        self.counters.batch_calls.load(Ordering::SeqCst)
    }

    /// Number of `embed_query` calls so far.
    pub fn query_calls(&self) -> usize {
        self.counters.query_calls.load(Ordering::SeqCst)
    }

    /// Total texts embedded through `embed_batch`.
    pub fn texts_embedded(&self) -> usize {
        self.counters.texts_embedded.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with an embedding error.
    pub fn set_failing(&self, failing: bool) {
        self.counters.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, text: &str) -> Result<()> {
        if self.counters.failing.load(Ordering::SeqCst) {
            return Err(CurbsideError::Embedding("mock embedding failure".to_string()));
        }
        if text.is_empty() {
            return Err(CurbsideError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(())
    }

    fn lexical_vector(&self, text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        {
            let bucket = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            result[bucket] += 1.0;
        }
        result
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

impl EmbeddingService for MockEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.counters.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            self.check(text)?;
            vectors.push(self.lexical_vector(text));
        }
        self.counters
            .texts_embedded
            .fetch_add(texts.len(), Ordering::SeqCst);
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.counters.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check(text)?;
        Ok(self.lexical_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
