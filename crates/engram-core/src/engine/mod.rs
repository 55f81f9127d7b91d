//! Engram engine
//!
//! The facade binding storage, embeddings, decay, and the capability gate
//! into the command pipelines (`remember`, `recall`, `forget`,
//! `context_hydrate`) plus the maintenance surface (decay, prune, stats).

mod recall;
mod write;

#[cfg(feature = "embeddings")]
use std::num::NonZeroUsize;
#[cfg(feature = "embeddings")]
use std::sync::Mutex;

use chrono::Utc;
#[cfg(feature = "embeddings")]
use lru::LruCache;
#[cfg(feature = "embeddings")]
use tracing::warn;

use crate::capabilities::{Capabilities, FeatureFlags};
use crate::config::Config;
use crate::decay::{effective_strength, DecayedStrength};
use crate::memory::{ForgetInput, ForgetOutcome, Memory, MemoryStats, RecallInput, RecallResult, ScopeFilter, ScopeGuard};
use crate::metrics::{MetricEvent, MetricKind, MetricsSummary};
use crate::storage::{Storage, StorageError};

#[cfg(feature = "embeddings")]
use crate::embeddings::EmbeddingService;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Engine error taxonomy, translated to transport responses by handlers
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Missing or malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Referenced memory does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Operation gated behind a disabled feature flag
    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),
    /// Embedding load or inference failure surfaced directly (never fatal
    /// for writes or recall, which degrade instead)
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngramError>;

// ============================================================================
// ENGINE
// ============================================================================

/// Number of query embeddings kept in the LRU cache
#[cfg(feature = "embeddings")]
const QUERY_CACHE_SIZE: usize = 100;

/// The memory engine. `Send + Sync`; transports share it via `Arc<Engram>`.
pub struct Engram {
    storage: Storage,
    config: Config,
    #[cfg(feature = "embeddings")]
    embedder: EmbeddingService,
    /// LRU cache for query embeddings to avoid re-embedding repeated queries
    #[cfg(feature = "embeddings")]
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    /// Pinned flags for tests; None means resolve from the environment at
    /// request time so flags can toggle without restart
    flags_override: Option<FeatureFlags>,
}

impl Engram {
    /// Open the engine with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, None)
    }

    /// Open the engine with pinned feature flags (tests)
    pub fn with_flags(config: Config, flags: FeatureFlags) -> Result<Self> {
        Self::build(config, Some(flags))
    }

    fn build(config: Config, flags_override: Option<FeatureFlags>) -> Result<Self> {
        let storage = Storage::open(&config.db_path)?;

        #[cfg(feature = "embeddings")]
        let embedder = EmbeddingService::new(&config.embedding_model, config.model_cache_dir());

        Ok(Self {
            storage,
            config,
            #[cfg(feature = "embeddings")]
            embedder,
            #[cfg(feature = "embeddings")]
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            flags_override,
        })
    }

    /// Current feature flags, resolved per request
    pub fn flags(&self) -> FeatureFlags {
        self.flags_override.unwrap_or_else(FeatureFlags::from_env)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Capability document for the `capabilities` surfaces
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(self.flags())
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Delete a memory by id. The scope guard depends on the `scopes` flag:
    /// disabled deletes by id alone; enabled with a scope deletes only a
    /// matching-scope row; enabled without a scope deletes only unscoped
    /// rows. A forget metric is logged regardless of outcome.
    pub fn forget(&self, input: ForgetInput) -> Result<ForgetOutcome> {
        let flags = self.flags();
        let guard = if !flags.scopes {
            ScopeGuard::Any
        } else {
            match input.scope_id {
                Some(scope) => ScopeGuard::Scoped(scope),
                None => ScopeGuard::Unscoped,
            }
        };

        let deleted = self.storage.delete_memory(&input.id, &guard)?;

        self.storage.log_metric(
            &MetricEvent::new(MetricKind::Forget)
                .session(input.session_id.as_deref())
                .memory(&input.id),
        )?;

        Ok(ForgetOutcome {
            id: input.id,
            deleted,
        })
    }

    /// Context hydration: recall with an optional query, gated by its flag
    pub fn hydrate(&self, input: RecallInput) -> Result<RecallResult> {
        if !self.flags().context_hydration {
            return Err(EngramError::FeatureDisabled("context_hydrate".to_string()));
        }
        self.recall(input)
    }

    // ========================================================================
    // READ SURFACES
    // ========================================================================

    /// Fetch a memory by id
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.storage.get_memory_by_id(id)?)
    }

    /// Recent memories ordered by strength then last access
    pub fn recent(&self, limit: usize) -> Result<Vec<Memory>> {
        Ok(self.storage.recent(limit, &ScopeFilter::default())?)
    }

    /// Aggregate store statistics
    pub fn stats(&self) -> Result<MemoryStats> {
        Ok(self.storage.stats()?)
    }

    /// Aggregate metrics, optionally for one session
    pub fn metrics_summary(&self, session: Option<&str>) -> Result<MetricsSummary> {
        Ok(self.storage.metrics_summary(session)?)
    }

    /// Whether the embedding model can be loaded
    #[cfg(feature = "embeddings")]
    pub fn embedder_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    #[cfg(not(feature = "embeddings"))]
    pub fn embedder_ready(&self) -> bool {
        false
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Compute effective strengths for every memory without writing anything
    pub fn decay_preview(&self) -> Result<Vec<DecayedStrength>> {
        let now = Utc::now();
        let rows = self.storage.get_for_decay()?;
        Ok(rows
            .into_iter()
            .map(|m| DecayedStrength {
                effective_strength: effective_strength(
                    m.strength,
                    m.last_accessed,
                    m.access_count,
                    now,
                    self.config.decay_rate,
                ),
                id: m.id,
                base_strength: m.strength,
                last_accessed: m.last_accessed,
                access_count: m.access_count,
            })
            .collect())
    }

    /// Persist decayed strengths. This is the only path besides
    /// `update_access` allowed to write the strength column.
    pub fn decay_apply(&self) -> Result<usize> {
        let mut applied = 0;
        for row in self.decay_preview()? {
            if (row.effective_strength - row.base_strength).abs() > f64::EPSILON {
                self.storage.set_strength(&row.id, row.effective_strength)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Delete memories whose effective (decayed) strength is below the
    /// threshold. Returns the number removed.
    pub fn prune(&self, threshold: f64) -> Result<usize> {
        let mut pruned = 0;
        for row in self.decay_preview()? {
            if row.effective_strength < threshold
                && self.storage.delete_memory(&row.id, &ScopeGuard::Any)?
            {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // ========================================================================
    // EMBEDDING HELPERS
    // ========================================================================

    /// Best-effort embedding for the write path: failures are logged and the
    /// write proceeds without a vector.
    #[cfg(feature = "embeddings")]
    pub(crate) fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("Embedding unavailable, storing without vector: {}", e);
                None
            }
        }
    }

    #[cfg(not(feature = "embeddings"))]
    pub(crate) fn try_embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    /// Embed a query, consulting the LRU cache first
    #[cfg(feature = "embeddings")]
    pub(crate) fn query_embedding(
        &self,
        query: &str,
    ) -> std::result::Result<Vec<f32>, crate::embeddings::EmbeddingError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(query) {
                return Ok(cached.clone());
            }
        }

        let vector = self.embedder.embed(query)?;

        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }

        Ok(vector)
    }

    /// Expected embedding dimension for the configured model
    #[cfg(feature = "embeddings")]
    pub(crate) fn embedding_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }
}
