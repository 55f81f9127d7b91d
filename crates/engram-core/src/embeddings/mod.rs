//! Embedding adapter
//!
//! Text to fixed-dimension unit vector, backed by local fastembed inference.

mod local;

pub use local::{
    cosine_similarity, from_blob, normalize, reset, to_blob, EmbeddingError, EmbeddingService,
    DEFAULT_DIMENSIONS, MAX_TEXT_LENGTH,
};
