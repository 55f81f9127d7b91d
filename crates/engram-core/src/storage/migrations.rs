//! Database migrations
//!
//! Versioned, additive schema migrations. Each migration is plain SQL applied
//! with `execute_batch`; the one structural change (the idempotency ledger's
//! composite primary key) rebuilds the table inside a transaction, guarded by
//! primary-key metadata inspection so it also repairs databases whose
//! `schema_version` table was lost.

use rusqlite::Connection;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, FTS index, metrics, idempotency ledger",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Scope dimensions on memories and the ledger",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Composite idempotency primary key (key, operation, scope_key)",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "Reserved work_items schema",
        up: MIGRATION_V4_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// V1: initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    category TEXT,
    metadata TEXT,
    idempotency_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 1,
    strength REAL NOT NULL DEFAULT 1.0,
    embedding BLOB
);

CREATE INDEX IF NOT EXISTS idx_memories_strength ON memories(strength);
CREATE INDEX IF NOT EXISTS idx_memories_last_accessed ON memories(last_accessed);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

-- FTS5 virtual table, kept write-through by the triggers below
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id,
    content,
    content='memories',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
    INSERT INTO memories_fts(rowid, id, content)
    VALUES (NEW.rowid, NEW.id, NEW.content);
END;

-- Append-only metric events
CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    session_id TEXT,
    event TEXT NOT NULL,
    memory_id TEXT,
    query TEXT,
    result_count INTEGER,
    was_fallback INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_metrics_event ON metrics(event);
CREATE INDEX IF NOT EXISTS idx_metrics_session ON metrics(session_id);

-- Idempotency ledger (single-key form; v3 rebuilds with the composite key)
CREATE TABLE IF NOT EXISTS idempotency_keys (
    key TEXT PRIMARY KEY,
    operation TEXT NOT NULL DEFAULT 'remember',
    result TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: scope dimensions
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE memories ADD COLUMN scope_id TEXT;
ALTER TABLE memories ADD COLUMN chat_id TEXT;
ALTER TABLE memories ADD COLUMN thread_id TEXT;
ALTER TABLE memories ADD COLUMN task_id TEXT;

CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(scope_id);
CREATE INDEX IF NOT EXISTS idx_memories_chat ON memories(chat_id);
CREATE INDEX IF NOT EXISTS idx_memories_thread ON memories(thread_id);
CREATE INDEX IF NOT EXISTS idx_memories_task ON memories(task_id);

-- One row per (idempotency_key, scope) among memories that carry a key
CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_idem_scope
    ON memories(idempotency_key, coalesce(scope_id, '__global__'))
    WHERE idempotency_key IS NOT NULL;

ALTER TABLE idempotency_keys ADD COLUMN scope_id TEXT;

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: ledger composite primary key. The rebuild itself runs in
/// `apply_migrations` so it can be guarded by PK metadata inspection;
/// this statement only bumps the recorded version.
const MIGRATION_V3_UP: &str = r#"
UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// V4: reserved work-items schema (no operations are defined against it yet)
const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS work_items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    scope_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
CREATE INDEX IF NOT EXISTS idx_work_items_scope ON work_items(scope_id);

UPDATE schema_version SET version = 4, applied_at = datetime('now');
"#;

/// Get current schema version from the database
pub fn get_current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// True when the idempotency ledger already has its composite primary key
fn ledger_has_composite_pk(conn: &Connection) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("PRAGMA table_info(idempotency_keys)")?;
    let pk_columns = stmt
        .query_map([], |row| row.get::<_, i64>("pk"))?
        .filter_map(|r| r.ok())
        .filter(|pk| *pk > 0)
        .count();
    Ok(pk_columns > 1)
}

/// Rebuild the ledger with `PRIMARY KEY (key, operation, scope_key)`,
/// copying rows with `scope_key = coalesce(scope_id, '__global__')`.
fn rebuild_ledger(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
BEGIN;
CREATE TABLE idempotency_keys_new (
    key TEXT NOT NULL,
    operation TEXT NOT NULL DEFAULT 'remember',
    scope_key TEXT NOT NULL DEFAULT '__global__',
    result TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (key, operation, scope_key)
);
INSERT INTO idempotency_keys_new (key, operation, scope_key, result, created_at)
    SELECT key, operation, coalesce(scope_id, '__global__'), result, created_at
    FROM idempotency_keys;
DROP TABLE idempotency_keys;
ALTER TABLE idempotency_keys_new RENAME TO idempotency_keys;
COMMIT;
"#,
    )
}

/// Apply pending migrations
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // V3: table rebuild can't be expressed as pure additive SQL, and
            // the PK inspection makes it safe to re-run on any ledger shape
            if migration.version == 3 && !ledger_has_composite_pk(conn)? {
                rebuild_ledger(conn)?;
            }

            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_apply_cleanly() {
        let conn = open_memory_db();
        assert_eq!(get_current_version(&conn).unwrap(), 4);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = open_memory_db();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn test_ledger_has_composite_pk_after_migration() {
        let conn = open_memory_db();
        assert!(ledger_has_composite_pk(&conn).unwrap());
    }

    #[test]
    fn test_legacy_ledger_rows_survive_rebuild() {
        let conn = Connection::open_in_memory().unwrap();

        // Build a v2-era database by hand: single-column primary key
        conn.execute_batch(MIGRATION_V1_UP).unwrap();
        conn.execute_batch(MIGRATION_V2_UP).unwrap();
        conn.execute(
            "INSERT INTO idempotency_keys (key, operation, scope_id, result, created_at)
             VALUES ('k1', 'remember', NULL, '{\"id\":\"m1\"}', datetime('now'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO idempotency_keys (key, operation, scope_id, result, created_at)
             VALUES ('k2', 'remember', 'scope-a', '{\"id\":\"m2\"}', datetime('now'))",
            [],
        )
        .unwrap();
        assert!(!ledger_has_composite_pk(&conn).unwrap());

        apply_migrations(&conn).unwrap();
        assert!(ledger_has_composite_pk(&conn).unwrap());

        let scope_key: String = conn
            .query_row(
                "SELECT scope_key FROM idempotency_keys WHERE key = 'k1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scope_key, "__global__");

        let scope_key: String = conn
            .query_row(
                "SELECT scope_key FROM idempotency_keys WHERE key = 'k2'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scope_key, "scope-a");
    }

    #[test]
    fn test_fts_delete_trigger_removes_row() {
        let conn = open_memory_db();
        conn.execute(
            "INSERT INTO memories (id, content, created_at, updated_at, last_accessed)
             VALUES ('m1', 'trigger test content', datetime('now'), datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'trigger'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("DELETE FROM memories WHERE id = 'm1'", []).unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'trigger'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }
}
