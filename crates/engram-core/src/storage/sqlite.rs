//! SQLite storage implementation
//!
//! Single-file embedded database in WAL mode. Uses separate reader/writer
//! connections behind mutexes for interior mutability, so `Storage` is
//! `Send + Sync` and the transport layer can share it via `Arc<Storage>`.
//! All operations are synchronous and either succeed or surface a structured
//! error; the write-ahead log provides crash consistency.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::embeddings::{from_blob, to_blob};
use crate::memory::{Memory, MemoryStats, ScopeFilter, ScopeGuard};
use crate::metrics::{MetricEvent, MetricsSummary};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Memory not found
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Idempotency ledger row failed to parse
    #[error("Corrupt ledger entry for key '{0}'")]
    CorruptLedger(String),
    /// Invalid timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// WRITE INPUTS
// ============================================================================

/// Fields for a new memory row. Timestamps, access count, and base strength
/// are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub category: Option<String>,
    pub scope_id: Option<String>,
    pub chat_id: Option<String>,
    pub thread_id: Option<String>,
    pub task_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Full replacement of the mutable content fields. Omitted optional fields
/// become NULL; lifecycle counters and scope fields are preserved.
#[derive(Debug, Clone, Default)]
pub struct ContentUpdate {
    pub content: String,
    pub category: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub embedding: Option<Vec<f32>>,
}

// ============================================================================
// STORAGE
// ============================================================================

/// SQLite-backed memory store
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Storage {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database at `path` and apply migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        // Restrict database file permissions to owner-only on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    /// Parse RFC3339 timestamp
    fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Invalid {} timestamp '{}': {}", field_name, value, e),
                    )),
                )
            })
    }

    /// Convert a row to a Memory
    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let last_accessed: String = row.get("last_accessed")?;

        let metadata: Option<String> = row.get("metadata")?;
        let embedding: Option<Vec<u8>> = row.get("embedding")?;

        Ok(Memory {
            id: row.get("id")?,
            content: row.get("content")?,
            category: row.get("category")?,
            scope_id: row.get("scope_id")?,
            chat_id: row.get("chat_id")?,
            thread_id: row.get("thread_id")?,
            task_id: row.get("task_id")?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            idempotency_key: row.get("idempotency_key")?,
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at, "updated_at")?,
            last_accessed: Self::parse_timestamp(&last_accessed, "last_accessed")?,
            access_count: row.get("access_count")?,
            strength: row.get("strength")?,
            embedding: embedding.as_deref().and_then(from_blob),
        })
    }

    /// Append scope constraints to a WHERE clause; constraints combine with
    /// AND, absent constraints leave the column unfiltered.
    fn push_scope_conditions(
        filter: &ScopeFilter,
        sql: &mut String,
        bindings: &mut Vec<Box<dyn ToSql>>,
    ) {
        let columns: [(&str, &Option<String>); 4] = [
            ("scope_id", &filter.scope_id),
            ("chat_id", &filter.chat_id),
            ("thread_id", &filter.thread_id),
            ("task_id", &filter.task_id),
        ];
        for (column, value) in columns {
            if let Some(value) = value {
                sql.push_str(&format!(" AND m.{} = ?", column));
                bindings.push(Box::new(value.clone()));
            }
        }
    }

    // ========================================================================
    // MEMORY CRUD
    // ========================================================================

    /// Create a new memory row with current timestamps and defaults
    pub fn create_memory(&self, input: NewMemory) -> Result<Memory> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let metadata = input
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string()));
        let embedding = input.embedding.as_deref().map(to_blob);

        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO memories (
                    id, content, category, scope_id, chat_id, thread_id, task_id,
                    metadata, idempotency_key, created_at, updated_at, last_accessed,
                    access_count, strength, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, 1.0, ?13)",
                params![
                    id,
                    input.content,
                    input.category,
                    input.scope_id,
                    input.chat_id,
                    input.thread_id,
                    input.task_id,
                    metadata,
                    input.idempotency_key,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    embedding,
                ],
            )?;
        }

        self.get_memory_by_id(&id)?
            .ok_or(StorageError::NotFound(id))
    }

    /// Get a memory by id
    pub fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT m.* FROM memories m WHERE m.id = ?1")?;
        let memory = stmt
            .query_row(params![id], |row| Self::row_to_memory(row))
            .optional()?;
        Ok(memory)
    }

    /// Replace content, category, metadata, and embedding; refresh updated_at.
    /// Everything else (id, created_at, access_count, strength, scopes) is
    /// preserved.
    pub fn update_memory_content(&self, id: &str, update: ContentUpdate) -> Result<()> {
        let now = Utc::now();
        let metadata = update
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string()));
        let embedding = update.embedding.as_deref().map(to_blob);

        let writer = self.writer()?;
        let rows = writer.execute(
            "UPDATE memories
             SET content = ?1, category = ?2, metadata = ?3, embedding = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                update.content,
                update.category,
                metadata,
                embedding,
                now.to_rfc3339(),
                id
            ],
        )?;

        if rows == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a memory, honoring the scope guard. The FTS row is removed by
    /// trigger. Returns whether a row was deleted.
    pub fn delete_memory(&self, id: &str, guard: &ScopeGuard) -> Result<bool> {
        let writer = self.writer()?;
        let rows = match guard {
            ScopeGuard::Any => {
                writer.execute("DELETE FROM memories WHERE id = ?1", params![id])?
            }
            ScopeGuard::Unscoped => writer.execute(
                "DELETE FROM memories WHERE id = ?1 AND scope_id IS NULL",
                params![id],
            )?,
            ScopeGuard::Scoped(scope) => writer.execute(
                "DELETE FROM memories WHERE id = ?1 AND scope_id = ?2",
                params![id, scope],
            )?,
        };
        Ok(rows > 0)
    }

    /// Scoped lookup by idempotency key. `scope_id = None` matches unscoped
    /// rows only.
    pub fn find_by_idempotency_key(
        &self,
        key: &str,
        scope_id: Option<&str>,
    ) -> Result<Option<Memory>> {
        let reader = self.reader()?;
        let memory = match scope_id {
            Some(scope) => {
                let mut stmt = reader.prepare(
                    "SELECT m.* FROM memories m
                     WHERE m.idempotency_key = ?1 AND m.scope_id = ?2",
                )?;
                stmt.query_row(params![key, scope], |row| Self::row_to_memory(row))
                    .optional()?
            }
            None => {
                let mut stmt = reader.prepare(
                    "SELECT m.* FROM memories m
                     WHERE m.idempotency_key = ?1 AND m.scope_id IS NULL",
                )?;
                stmt.query_row(params![key], |row| Self::row_to_memory(row))
                    .optional()?
            }
        };
        Ok(memory)
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Full-text search returning memories with their FTS rank (more negative
    /// is better). An empty or whitespace-only query returns recent memories
    /// ordered by strength then recency, with a synthetic rank of 0.
    pub fn search_fts(
        &self,
        query: &str,
        limit: usize,
        filter: &ScopeFilter,
    ) -> Result<Vec<(Memory, f64)>> {
        if query.trim().is_empty() {
            return self
                .recent(limit, filter)
                .map(|rows| rows.into_iter().map(|m| (m, 0.0)).collect());
        }

        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            // Nothing tokenizable to match against
            return Ok(Vec::new());
        }
        let mut sql = String::from(
            "SELECT m.*, fts.rank AS fts_rank
             FROM memories m
             JOIN memories_fts fts ON m.id = fts.id
             WHERE memories_fts MATCH ?",
        );
        let mut bindings: Vec<Box<dyn ToSql>> = vec![Box::new(sanitized)];
        Self::push_scope_conditions(filter, &mut sql, &mut bindings);
        sql.push_str(" ORDER BY fts.rank LIMIT ?");
        bindings.push(Box::new(limit as i64));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(bindings.iter().map(|b| b.as_ref())),
            |row| {
                let rank: f64 = row.get("fts_rank")?;
                Ok((Self::row_to_memory(row)?, rank))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Recent memories ordered by strength then last access
    pub fn recent(&self, limit: usize, filter: &ScopeFilter) -> Result<Vec<Memory>> {
        let mut sql = String::from("SELECT m.* FROM memories m WHERE 1=1");
        let mut bindings: Vec<Box<dyn ToSql>> = Vec::new();
        Self::push_scope_conditions(filter, &mut sql, &mut bindings);
        sql.push_str(" ORDER BY m.strength DESC, m.last_accessed DESC LIMIT ?");
        bindings.push(Box::new(limit as i64));

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(bindings.iter().map(|b| b.as_ref())),
            |row| Self::row_to_memory(row),
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// All memories carrying an embedding, honoring scope filters
    pub fn get_with_embeddings(&self, filter: &ScopeFilter) -> Result<Vec<Memory>> {
        let mut sql =
            String::from("SELECT m.* FROM memories m WHERE m.embedding IS NOT NULL");
        let mut bindings: Vec<Box<dyn ToSql>> = Vec::new();
        Self::push_scope_conditions(filter, &mut sql, &mut bindings);

        let reader = self.reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(bindings.iter().map(|b| b.as_ref())),
            |row| Self::row_to_memory(row),
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ========================================================================
    // ACCESS & DECAY
    // ========================================================================

    /// Record a recall hit: refresh last_accessed, set the configured boost
    /// strength, bump access_count.
    pub fn update_access(&self, id: &str, boost_strength: f64) -> Result<()> {
        let now = Utc::now();
        let writer = self.writer()?;
        writer.execute(
            "UPDATE memories
             SET last_accessed = ?1, strength = ?2, access_count = access_count + 1
             WHERE id = ?3",
            params![now.to_rfc3339(), boost_strength, id],
        )?;
        Ok(())
    }

    /// All memories, for decay computation
    pub fn get_for_decay(&self) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT m.* FROM memories m ORDER BY m.last_accessed ASC")?;
        let rows = stmt.query_map([], |row| Self::row_to_memory(row))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Memories whose stored strength is below the threshold
    pub fn get_below_strength(&self, threshold: f64) -> Result<Vec<Memory>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT m.* FROM memories m WHERE m.strength < ?1 ORDER BY m.strength ASC",
        )?;
        let rows = stmt.query_map(params![threshold], |row| Self::row_to_memory(row))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Delete memories whose stored strength is below the threshold.
    /// Returns the number of rows removed.
    pub fn prune_below_strength(&self, threshold: f64) -> Result<usize> {
        let writer = self.writer()?;
        let rows = writer.execute(
            "DELETE FROM memories WHERE strength < ?1",
            params![threshold],
        )?;
        Ok(rows)
    }

    /// Persist a computed strength (the `decay --apply` maintenance path)
    pub fn set_strength(&self, id: &str, strength: f64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE memories SET strength = ?1 WHERE id = ?2",
            params![strength.clamp(0.0, 1.0), id],
        )?;
        Ok(())
    }

    // ========================================================================
    // METRICS
    // ========================================================================

    /// Append a metric event
    pub fn log_metric(&self, event: &MetricEvent) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO metrics (timestamp, session_id, event, memory_id, query, result_count, was_fallback)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                event.session_id,
                event.kind.as_str(),
                event.memory_id,
                event.query,
                event.result_count,
                event.was_fallback as i64,
            ],
        )?;
        Ok(())
    }

    /// Aggregate metrics, optionally for one session. Zero denominators
    /// produce zero rates.
    pub fn metrics_summary(&self, session: Option<&str>) -> Result<MetricsSummary> {
        let sql = "SELECT
                COUNT(CASE WHEN event = 'remember' THEN 1 END),
                COUNT(CASE WHEN event = 'recall' THEN 1 END),
                COUNT(CASE WHEN event = 'recall' AND result_count > 0 THEN 1 END),
                COUNT(CASE WHEN event = 'recall' AND was_fallback = 1 THEN 1 END)
             FROM metrics";

        let reader = self.reader()?;
        let (remembers, recalls, hits, fallbacks): (i64, i64, i64, i64) = match session {
            Some(session) => reader.query_row(
                &format!("{} WHERE session_id = ?1", sql),
                params![session],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?,
            None => reader.query_row(sql, [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?,
        };

        let rate = |numerator: i64| {
            if recalls > 0 {
                numerator as f64 / recalls as f64
            } else {
                0.0
            }
        };

        Ok(MetricsSummary {
            total_remembers: remembers,
            total_recalls: recalls,
            recall_hit_rate: rate(hits),
            fallback_rate: rate(fallbacks),
        })
    }

    // ========================================================================
    // IDEMPOTENCY LEDGER
    // ========================================================================

    /// Save a ledger row. Idempotent: replaying the same (key, operation,
    /// scope) overwrites with an identical payload.
    pub fn save_idempotency(
        &self,
        key: &str,
        operation: &str,
        scope_key: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO idempotency_keys (key, operation, scope_key, result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                operation,
                scope_key,
                result.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Fetch a cached ledger result. A row that fails to parse surfaces as
    /// `CorruptLedger`, never as a silently-absent entry.
    pub fn get_idempotency(
        &self,
        key: &str,
        operation: &str,
        scope_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let reader = self.reader()?;
        let raw: Option<String> = reader
            .query_row(
                "SELECT result FROM idempotency_keys
                 WHERE key = ?1 AND operation = ?2 AND scope_key = ?3",
                params![key, operation, scope_key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|_| StorageError::CorruptLedger(key.to_string())),
            None => Ok(None),
        }
    }

    // ========================================================================
    // STATS
    // ========================================================================

    /// Total number of memories
    pub fn count(&self) -> Result<i64> {
        let reader = self.reader()?;
        let count = reader.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Aggregate store statistics
    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.reader()?;

        let total: i64 =
            reader.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        let with_embeddings: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let unscoped: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE scope_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        let average_strength: f64 = reader.query_row(
            "SELECT COALESCE(AVG(strength), 0) FROM memories",
            [],
            |row| row.get(0),
        )?;
        let oldest: Option<String> = reader
            .query_row("SELECT MIN(created_at) FROM memories", [], |row| row.get(0))
            .ok()
            .flatten();
        let newest: Option<String> = reader
            .query_row("SELECT MAX(created_at) FROM memories", [], |row| row.get(0))
            .ok()
            .flatten();

        let parse = |s: String| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        };

        Ok(MemoryStats {
            total_memories: total,
            with_embeddings,
            unscoped,
            average_strength,
            oldest_memory: oldest.and_then(parse),
            newest_memory: newest.and_then(parse),
        })
    }
}

// ============================================================================
// FTS QUERY SANITIZATION
// ============================================================================

/// Quote every token so user input can never inject FTS5 query syntax
/// (NEAR, AND, column filters, ...). Tokens combine with implicit AND.
/// Punctuation-only tokens are dropped; they tokenize to nothing and FTS5
/// rejects the resulting empty phrase.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(&dir.path().join("test.db")).unwrap();
        (storage, dir)
    }

    fn new_memory(content: &str) -> NewMemory {
        NewMemory {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let (storage, _dir) = test_storage();
        let created = storage
            .create_memory(NewMemory {
                content: "Rust ownership rules".to_string(),
                category: Some("fact".to_string()),
                metadata: Some(serde_json::json!({"source": "book"})),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(created.access_count, 1);
        assert!((created.strength - 1.0).abs() < f64::EPSILON);
        assert!(created.created_at <= created.updated_at);

        let fetched = storage.get_memory_by_id(&created.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Rust ownership rules");
        assert_eq!(fetched.category.as_deref(), Some("fact"));
        assert_eq!(fetched.metadata.unwrap()["source"], "book");
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (storage, _dir) = test_storage();
        assert!(storage.get_memory_by_id("nope").unwrap().is_none());
    }

    #[test]
    fn test_fts_search_finds_and_ranks() {
        let (storage, _dir) = test_storage();
        storage.create_memory(new_memory("The borrow checker enforces aliasing rules")).unwrap();
        storage.create_memory(new_memory("Chocolate cake recipe with dark cocoa")).unwrap();

        let results = storage
            .search_fts("borrow checker", 10, &ScopeFilter::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].0.content.contains("borrow"));
        // FTS5 bm25 ranks are negative for matches
        assert!(results[0].1 <= 0.0);
    }

    #[test]
    fn test_fts_query_injection_is_inert() {
        let (storage, _dir) = test_storage();
        storage.create_memory(new_memory("plain content")).unwrap();

        // Raw FTS5 syntax would error; sanitized it just finds nothing
        let results = storage
            .search_fts("content NEAR/2 \"x OR", 10, &ScopeFilter::default())
            .unwrap();
        assert!(results.len() <= 1);
    }

    #[test]
    fn test_empty_query_returns_recent_with_zero_rank() {
        let (storage, _dir) = test_storage();
        storage.create_memory(new_memory("First memory")).unwrap();
        storage.create_memory(new_memory("Second memory")).unwrap();

        let results = storage.search_fts("   ", 10, &ScopeFilter::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, rank)| *rank == 0.0));
    }

    #[test]
    fn test_scope_filter_composition() {
        let (storage, _dir) = test_storage();
        storage
            .create_memory(NewMemory {
                content: "scoped note".to_string(),
                scope_id: Some("a".to_string()),
                chat_id: Some("c1".to_string()),
                ..Default::default()
            })
            .unwrap();
        storage
            .create_memory(NewMemory {
                content: "scoped note".to_string(),
                scope_id: Some("b".to_string()),
                ..Default::default()
            })
            .unwrap();
        storage.create_memory(new_memory("scoped note")).unwrap();

        let filter = ScopeFilter {
            scope_id: Some("a".to_string()),
            ..Default::default()
        };
        let results = storage.search_fts("scoped", 10, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.scope_id.as_deref(), Some("a"));

        // Constraints AND together: scope a + wrong chat finds nothing
        let filter = ScopeFilter {
            scope_id: Some("a".to_string()),
            chat_id: Some("other".to_string()),
            ..Default::default()
        };
        assert!(storage.search_fts("scoped", 10, &filter).unwrap().is_empty());

        // No constraints: everything matches
        let results = storage
            .search_fts("scoped", 10, &ScopeFilter::default())
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_delete_scope_guards() {
        let (storage, _dir) = test_storage();
        let scoped = storage
            .create_memory(NewMemory {
                content: "guarded".to_string(),
                scope_id: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();

        // Unscoped guard must not match a scoped row
        assert!(!storage.delete_memory(&scoped.id, &ScopeGuard::Unscoped).unwrap());
        // Wrong scope must not match
        assert!(!storage
            .delete_memory(&scoped.id, &ScopeGuard::Scoped("b".to_string()))
            .unwrap());
        // Matching scope deletes
        assert!(storage
            .delete_memory(&scoped.id, &ScopeGuard::Scoped("a".to_string()))
            .unwrap());
        assert!(storage.get_memory_by_id(&scoped.id).unwrap().is_none());
    }

    #[test]
    fn test_deleted_memory_leaves_fts() {
        let (storage, _dir) = test_storage();
        let m = storage.create_memory(new_memory("ephemeral xylophone")).unwrap();
        storage.delete_memory(&m.id, &ScopeGuard::Any).unwrap();

        let results = storage
            .search_fts("xylophone", 10, &ScopeFilter::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_update_access_bumps_counters() {
        let (storage, _dir) = test_storage();
        let m = storage.create_memory(new_memory("accessed")).unwrap();

        storage.update_access(&m.id, 1.0).unwrap();
        storage.update_access(&m.id, 1.0).unwrap();

        let after = storage.get_memory_by_id(&m.id).unwrap().unwrap();
        assert_eq!(after.access_count, 3);
        assert!((after.strength - 1.0).abs() < f64::EPSILON);
        assert!(after.last_accessed >= m.last_accessed);
        // created_at and updated_at are untouched by access
        assert_eq!(after.created_at, m.created_at);
        assert_eq!(after.updated_at, m.updated_at);
    }

    #[test]
    fn test_update_content_full_replace() {
        let (storage, _dir) = test_storage();
        let m = storage
            .create_memory(NewMemory {
                content: "original".to_string(),
                category: Some("fact".to_string()),
                metadata: Some(serde_json::json!({"k": "v"})),
                ..Default::default()
            })
            .unwrap();

        storage
            .update_memory_content(
                &m.id,
                ContentUpdate {
                    content: "replaced".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();

        let after = storage.get_memory_by_id(&m.id).unwrap().unwrap();
        assert_eq!(after.content, "replaced");
        assert!(after.category.is_none());
        assert!(after.metadata.is_none());
        assert_eq!(after.created_at, m.created_at);
        assert_eq!(after.access_count, m.access_count);
    }

    #[test]
    fn test_update_content_missing_id_errors() {
        let (storage, _dir) = test_storage();
        let err = storage
            .update_memory_content(
                "missing",
                ContentUpdate {
                    content: "x".to_string(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_find_by_idempotency_key_is_scope_aware() {
        let (storage, _dir) = test_storage();
        let unscoped = storage
            .create_memory(NewMemory {
                content: "global".to_string(),
                idempotency_key: Some("shared".to_string()),
                ..Default::default()
            })
            .unwrap();
        let scoped = storage
            .create_memory(NewMemory {
                content: "in a".to_string(),
                idempotency_key: Some("shared".to_string()),
                scope_id: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();

        let found = storage.find_by_idempotency_key("shared", None).unwrap().unwrap();
        assert_eq!(found.id, unscoped.id);

        let found = storage
            .find_by_idempotency_key("shared", Some("a"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, scoped.id);

        assert!(storage
            .find_by_idempotency_key("shared", Some("b"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_ledger_roundtrip_and_corruption() {
        let (storage, _dir) = test_storage();
        let payload = serde_json::json!({"id": "m1", "status": "created"});
        storage
            .save_idempotency("k1", "remember", "__global__", &payload)
            .unwrap();

        let cached = storage
            .get_idempotency("k1", "remember", "__global__")
            .unwrap()
            .unwrap();
        assert_eq!(cached["id"], "m1");

        // Different operation or scope key is a miss
        assert!(storage.get_idempotency("k1", "upsert", "__global__").unwrap().is_none());
        assert!(storage.get_idempotency("k1", "remember", "scope-a").unwrap().is_none());

        // Corrupt the stored payload: parse failure must be an error
        {
            let writer = storage.writer().unwrap();
            writer
                .execute(
                    "UPDATE idempotency_keys SET result = 'not json' WHERE key = 'k1'",
                    [],
                )
                .unwrap();
        }
        let err = storage
            .get_idempotency("k1", "remember", "__global__")
            .unwrap_err();
        assert!(matches!(err, StorageError::CorruptLedger(_)));
    }

    #[test]
    fn test_metrics_summary_math() {
        let (storage, _dir) = test_storage();
        use crate::metrics::{MetricEvent, MetricKind};

        storage.log_metric(&MetricEvent::new(MetricKind::Remember)).unwrap();
        storage
            .log_metric(&MetricEvent::new(MetricKind::Recall).results(2, false))
            .unwrap();
        storage
            .log_metric(&MetricEvent::new(MetricKind::Recall).results(0, true))
            .unwrap();

        let summary = storage.metrics_summary(None).unwrap();
        assert_eq!(summary.total_remembers, 1);
        assert_eq!(summary.total_recalls, 2);
        assert!((summary.recall_hit_rate - 0.5).abs() < 1e-9);
        assert!((summary.fallback_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_summary_empty_store() {
        let (storage, _dir) = test_storage();
        let summary = storage.metrics_summary(None).unwrap();
        assert_eq!(summary.total_recalls, 0);
        assert_eq!(summary.recall_hit_rate, 0.0);
        assert_eq!(summary.fallback_rate, 0.0);
    }

    #[test]
    fn test_metrics_summary_session_filter() {
        let (storage, _dir) = test_storage();
        use crate::metrics::{MetricEvent, MetricKind};

        storage
            .log_metric(&MetricEvent::new(MetricKind::Recall).session(Some("s1")).results(1, false))
            .unwrap();
        storage
            .log_metric(&MetricEvent::new(MetricKind::Recall).session(Some("s2")).results(0, false))
            .unwrap();

        let summary = storage.metrics_summary(Some("s1")).unwrap();
        assert_eq!(summary.total_recalls, 1);
        assert!((summary.recall_hit_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_prune_below_strength() {
        let (storage, _dir) = test_storage();
        let weak = storage.create_memory(new_memory("weak")).unwrap();
        let strong = storage.create_memory(new_memory("strong")).unwrap();
        storage.set_strength(&weak.id, 0.05).unwrap();

        let pruned = storage.prune_below_strength(0.1).unwrap();
        assert_eq!(pruned, 1);
        assert!(storage.get_memory_by_id(&weak.id).unwrap().is_none());
        assert!(storage.get_memory_by_id(&strong.id).unwrap().is_some());
    }

    #[test]
    fn test_get_with_embeddings_filters_nulls() {
        let (storage, _dir) = test_storage();
        storage.create_memory(new_memory("no vector")).unwrap();
        storage
            .create_memory(NewMemory {
                content: "with vector".to_string(),
                embedding: Some(vec![0.6, 0.8]),
                ..Default::default()
            })
            .unwrap();

        let rows = storage.get_with_embeddings(&ScopeFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        let vector = rows[0].embedding.as_ref().unwrap();
        assert!((vector[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_sanitize_fts_query() {
        assert_eq!(sanitize_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(sanitize_fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        assert_eq!(sanitize_fts_query(""), "");
        assert_eq!(sanitize_fts_query("?!? ---"), "");
    }

    #[test]
    fn test_punctuation_only_query_matches_nothing() {
        let (storage, _dir) = test_storage();
        storage.create_memory(new_memory("plain content")).unwrap();
        let results = storage.search_fts("?!?", 10, &ScopeFilter::default()).unwrap();
        assert!(results.is_empty());
    }
}
