//! Local semantic embeddings
//!
//! Uses fastembed for local ONNX inference. The model handle is process-wide:
//! it is initialized lazily on the first embed call and shared by every
//! caller. Concurrent first callers block on the registry lock and receive
//! the same handle (or the same cached failure). `reset` clears the registry
//! so tests can exercise initialization paths.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::warn;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Dimensions of the default model (bge-small-en-v1.5)
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Maximum text length for embedding (truncated if longer)
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for embed_batch inference
const BATCH_SIZE: usize = 32;

// ============================================================================
// PROCESS-WIDE MODEL REGISTRY
// ============================================================================

type SharedModel = Arc<Mutex<TextEmbedding>>;

/// Lazily initialized model slot. Holding the outer lock during
/// initialization is what makes concurrent first callers share one load.
static REGISTRY: Mutex<Option<Result<SharedModel, String>>> = Mutex::new(None);

/// Clear the process-wide model so the next call re-initializes.
pub fn reset() {
    if let Ok(mut slot) = REGISTRY.lock() {
        *slot = None;
    }
}

/// Map a configured model identifier to a fastembed model and its dimension.
/// Unknown identifiers warn and fall back to the default.
fn model_spec(name: &str) -> (EmbeddingModel, usize) {
    match name.to_lowercase().as_str() {
        "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "nomic-embed-text-v1.5" => (EmbeddingModel::NomicEmbedTextV15, 768),
        other => {
            warn!(
                "Unknown embedding model '{}', falling back to bge-small-en-v1.5",
                other
            );
            (EmbeddingModel::BGESmallENV15, 384)
        }
    }
}

fn acquire(model_name: &str, cache_dir: &Path) -> Result<SharedModel, EmbeddingError> {
    let mut slot = REGISTRY
        .lock()
        .map_err(|_| EmbeddingError::ModelInit("registry lock poisoned".to_string()))?;

    if slot.is_none() {
        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!("Failed to create model cache directory {:?}: {}", cache_dir, e);
        }

        let (model, _) = model_spec(model_name);
        let options = InitOptions::new(model)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir.to_path_buf());

        *slot = Some(
            TextEmbedding::try_new(options)
                .map(|m| Arc::new(Mutex::new(m)))
                .map_err(|e| {
                    format!(
                        "Failed to initialize embedding model '{}': {}",
                        model_name, e
                    )
                }),
        );
    }

    match slot.as_ref() {
        Some(Ok(model)) => Ok(model.clone()),
        Some(Err(e)) => Err(EmbeddingError::ModelInit(e.clone())),
        None => unreachable!("registry slot populated above"),
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model
    ModelInit(String),
    /// Failed to generate an embedding
    Inference(String),
    /// Invalid input (empty text)
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ModelInit(e) => write!(f, "Model initialization failed: {}", e),
            EmbeddingError::Inference(e) => write!(f, "Embedding generation failed: {}", e),
            EmbeddingError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for EmbeddingError {}

// ============================================================================
// EMBEDDING SERVICE
// ============================================================================

/// Handle for generating embeddings with the configured model
#[derive(Debug, Clone)]
pub struct EmbeddingService {
    model_name: String,
    dimensions: usize,
    cache_dir: PathBuf,
}

impl EmbeddingService {
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Self {
        let (_, dimensions) = model_spec(model_name);
        Self {
            model_name: model_name.to_string(),
            dimensions,
            cache_dir,
        }
    }

    /// Vector dimension produced by the configured model
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Check if the model can be loaded (triggers initialization)
    pub fn is_ready(&self) -> bool {
        match acquire(&self.model_name, &self.cache_dir) {
            Ok(_) => true,
            Err(e) => {
                warn!("Embedding model not ready: {}", e);
                false
            }
        }
    }

    /// Initialize the model eagerly (downloads on first run)
    pub fn init(&self) -> Result<(), EmbeddingError> {
        acquire(&self.model_name, &self.cache_dir).map(|_| ())
    }

    /// Generate a unit-normalized embedding for a single text
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "Text cannot be empty".to_string(),
            ));
        }

        let model = acquire(&self.model_name, &self.cache_dir)?;
        let mut model = model
            .lock()
            .map_err(|_| EmbeddingError::ModelInit("model lock poisoned".to_string()))?;

        let text = truncate(text);
        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        let mut vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Inference("no embedding generated".to_string()))?;
        normalize(&mut vector);
        Ok(vector)
    }

    /// Generate unit-normalized embeddings for multiple texts
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = acquire(&self.model_name, &self.cache_dir)?;
        let mut model = model
            .lock()
            .map_err(|_| EmbeddingError::ModelInit("model lock poisoned".to_string()))?;

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk.iter().map(|t| truncate(t)).collect();
            let vectors = model
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
            for mut vector in vectors {
                normalize(&mut vector);
                all.push(vector);
            }
        }
        Ok(all)
    }
}

fn truncate(text: &str) -> &str {
    if text.len() > MAX_TEXT_LENGTH {
        // Back off to a char boundary so the slice never panics
        let mut end = MAX_TEXT_LENGTH;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    } else {
        text
    }
}

// ============================================================================
// VECTOR UTILITIES
// ============================================================================

/// Scale a vector to unit Euclidean norm (no-op for the zero vector)
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two vectors. With unit-normalized inputs this
/// equals the dot product, but the full form keeps the function total.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Serialize a vector to little-endian f32 bytes for BLOB storage
pub fn to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a BLOB back into a vector; None for malformed lengths
pub fn from_blob(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// TESTS
// ============================================================================
