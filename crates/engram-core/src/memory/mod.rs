//! Memory - the fundamental unit of storage
//!
//! Each memory is a short piece of text with:
//! - Optional category hint and structured metadata
//! - Optional scope dimensions for isolation
//! - Lifecycle timestamps and access counters
//! - An optional unit-normalized embedding vector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORY HINTS
// ============================================================================

/// Well-known category hints. Categories are free-form filter strings, not a
/// closed taxonomy; these are the values agent harnesses conventionally use.
pub const KNOWN_CATEGORIES: [&str; 5] = ["decision", "pattern", "fact", "preference", "insight"];

// ============================================================================
// MEMORY
// ============================================================================

/// A stored memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// The memory text, searchable via FTS and embeddings
    pub content: String,
    /// Optional category hint (decision, pattern, fact, preference, insight)
    pub category: Option<String>,
    /// Isolation dimensions; all optional, unscoped rows hold NULL
    pub scope_id: Option<String>,
    pub chat_id: Option<String>,
    pub thread_id: Option<String>,
    pub task_id: Option<String>,
    /// Caller-interpreted key/value map, persisted as a single JSON text blob
    pub metadata: Option<serde_json::Value>,
    /// Stable caller-chosen identity for retry/update
    pub idempotency_key: Option<String>,
    /// Never mutates after creation
    pub created_at: DateTime<Utc>,
    /// Changes only on content update
    pub updated_at: DateTime<Utc>,
    /// Changes on recall hit
    pub last_accessed: DateTime<Utc>,
    /// Starts at 1, increments on each recall hit
    pub access_count: i64,
    /// Persisted base strength in [0, 1]; effective strength is computed
    pub strength: f64,
    /// Unit-normalized embedding vector, absent when the embedder was unavailable
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

// ============================================================================
// SCOPE FILTERING
// ============================================================================

/// Optional scope constraints for queries. Constraints combine with AND;
/// an absent constraint leaves that column unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub scope_id: Option<String>,
    pub chat_id: Option<String>,
    pub thread_id: Option<String>,
    pub task_id: Option<String>,
}

impl ScopeFilter {
    pub fn is_empty(&self) -> bool {
        self.scope_id.is_none()
            && self.chat_id.is_none()
            && self.thread_id.is_none()
            && self.task_id.is_none()
    }
}

/// Guard applied to a delete: match by id alone, only unscoped rows,
/// or only rows in a specific scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeGuard {
    Any,
    Unscoped,
    Scoped(String),
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for `remember`
///
/// Uses `deny_unknown_fields` to prevent field injection attacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RememberInput {
    /// The content to store (required, non-empty)
    pub content: String,
    pub category: Option<String>,
    pub scope_id: Option<String>,
    pub chat_id: Option<String>,
    pub thread_id: Option<String>,
    pub task_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
    /// Create-or-replace by idempotency key (requires `idempotency_key`)
    #[serde(default)]
    pub upsert: bool,
    pub session_id: Option<String>,
}

/// Input for `recall` and `context_hydrate`
///
/// Uses `deny_unknown_fields` to prevent field injection attacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecallInput {
    /// Natural-language query; empty or whitespace-only means recent-mode
    #[serde(default)]
    pub query: String,
    /// Maximum results to return
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub category: Option<String>,
    /// Minimum effective strength to include
    #[serde(default = "default_min_strength")]
    pub min_strength: f64,
    pub session_id: Option<String>,
    pub scope_id: Option<String>,
    pub chat_id: Option<String>,
    pub thread_id: Option<String>,
    pub task_id: Option<String>,
}

fn default_limit() -> usize {
    10
}

fn default_min_strength() -> f64 {
    0.1
}

impl Default for RecallInput {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: default_limit(),
            category: None,
            min_strength: default_min_strength(),
            session_id: None,
            scope_id: None,
            chat_id: None,
            thread_id: None,
            task_id: None,
        }
    }
}

impl RecallInput {
    pub fn scope_filter(&self) -> ScopeFilter {
        ScopeFilter {
            scope_id: self.scope_id.clone(),
            chat_id: self.chat_id.clone(),
            thread_id: self.thread_id.clone(),
            task_id: self.task_id.clone(),
        }
    }
}

/// Input for `forget`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgetInput {
    pub id: String,
    pub scope_id: Option<String>,
    pub session_id: Option<String>,
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Outcome status of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStatus {
    Created,
    Updated,
}

/// Result of a `remember` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberOutcome {
    pub id: String,
    pub status: WriteStatus,
}

/// Result of a `forget` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetOutcome {
    pub id: String,
    pub deleted: bool,
}

/// A single ranked recall hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub id: String,
    pub content: String,
    pub category: Option<String>,
    /// Effective (decay-adjusted) strength at query time, not the stored base
    pub strength: f64,
    /// Ranking score: cosine similarity, exp(fts_rank), or effective strength
    /// depending on the retrieval path taken
    pub relevance: f64,
    pub created_at: DateTime<Utc>,
    pub access_count: i64,
}

/// Ordered recall results plus the mode flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    pub results: Vec<RecallHit>,
    /// True only for empty-query recent-mode
    pub fallback_mode: bool,
}

/// Aggregate store statistics for the CLI and status surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: i64,
    pub with_embeddings: i64,
    pub unscoped: i64,
    pub average_strength: f64,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_input_defaults() {
        let input: RecallInput = serde_json::from_str(r#"{"query": "rust"}"#).unwrap();
        assert_eq!(input.limit, 10);
        assert!((input.min_strength - 0.1).abs() < f64::EPSILON);
        assert!(input.scope_filter().is_empty());
    }

    #[test]
    fn test_remember_input_deny_unknown_fields() {
        let json = r#"{"content": "test", "category": "fact"}"#;
        assert!(serde_json::from_str::<RememberInput>(json).is_ok());

        let json_with_unknown = r#"{"content": "test", "malicious_field": "attack"}"#;
        assert!(serde_json::from_str::<RememberInput>(json_with_unknown).is_err());
    }

    #[test]
    fn test_write_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&WriteStatus::Created).unwrap(),
            "\"created\""
        );
        assert_eq!(
            serde_json::to_string(&WriteStatus::Updated).unwrap(),
            "\"updated\""
        );
    }

    #[test]
    fn test_scope_filter_from_input() {
        let input = RecallInput {
            scope_id: Some("project-a".to_string()),
            chat_id: Some("c1".to_string()),
            ..Default::default()
        };
        let filter = input.scope_filter();
        assert_eq!(filter.scope_id.as_deref(), Some("project-a"));
        assert_eq!(filter.chat_id.as_deref(), Some("c1"));
        assert!(filter.thread_id.is_none());
        assert!(!filter.is_empty());
    }
}
