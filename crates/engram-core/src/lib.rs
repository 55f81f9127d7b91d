//! # Engram Core
//!
//! Local, single-node memory store for AI coding agents:
//!
//! - **Storage**: single SQLite file in WAL mode, FTS5 kept in sync by
//!   triggers, additive migrations
//! - **Retrieval**: semantic vector search with full-text fallback and an
//!   empty-query recent-mode
//! - **Decay**: time-aware relevance computed on read, persisted only by the
//!   explicit maintenance path
//! - **Writes**: scoped, idempotent `remember` with create-or-replace upsert
//! - **Capability gate**: runtime feature flags for additive evolution
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use engram_core::{Config, Engram, RememberInput, RecallInput};
//!
//! let engine = Engram::new(Config::from_env())?;
//!
//! engine.remember(RememberInput {
//!     content: "We picked axum for the HTTP layer".to_string(),
//!     category: Some("decision".to_string()),
//!     ..Default::default()
//! })?;
//!
//! let hits = engine.recall(RecallInput {
//!     query: "which web framework did we choose?".to_string(),
//!     ..Default::default()
//! })?;
//! ```
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local embedding generation with fastembed.
//!   Without it (or when the model cannot load) recall serves from FTS and
//!   writes store no vectors.

// ============================================================================
// MODULES
// ============================================================================

pub mod capabilities;
pub mod config;
pub mod decay;
pub mod engine;
pub mod memory;
pub mod metrics;
pub mod storage;

#[cfg(feature = "embeddings")]
pub mod embeddings;

#[cfg(not(feature = "embeddings"))]
pub mod embeddings {
    //! Blob codec only; inference requires the `embeddings` feature.
    mod blob {
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
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        }
    }
    pub use blob::{from_blob, to_blob};
}

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use capabilities::{Capabilities, FeatureFlags, GLOBAL_SCOPE_KEY};
pub use config::Config;
pub use decay::{effective_strength, DecayedStrength};
pub use engine::{Engram, EngramError};
pub use memory::{
    ForgetInput, ForgetOutcome, Memory, MemoryStats, RecallHit, RecallInput, RecallResult,
    RememberInput, RememberOutcome, ScopeFilter, ScopeGuard, WriteStatus, KNOWN_CATEGORIES,
};
pub use metrics::{MetricEvent, MetricKind, MetricsSummary};
pub use storage::{ContentUpdate, NewMemory, Storage, StorageError};

#[cfg(feature = "embeddings")]
pub use embeddings::{cosine_similarity, EmbeddingError, EmbeddingService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
