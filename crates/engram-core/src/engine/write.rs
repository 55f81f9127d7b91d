//! Write pipeline
//!
//! `remember` is a durable, retry-safe write: plain creates, ledger-backed
//! replays, and full-replace upserts keyed by (idempotency_key, scope).
//! Embedding is always best-effort; a write never fails because the model
//! is unavailable.

use tracing::warn;

use crate::memory::{RememberInput, RememberOutcome, WriteStatus};
use crate::metrics::{MetricEvent, MetricKind};
use crate::storage::{ContentUpdate, NewMemory, StorageError};

use super::{Engram, EngramError, Result};

/// Ledger operation names. Updates are recorded under a separate operation so
/// a later non-upsert replay still sees the original create result.
const OP_REMEMBER: &str = "remember";
const OP_UPSERT: &str = "upsert";

impl Engram {
    /// Store a memory, honoring idempotency and upsert semantics
    pub fn remember(&self, input: RememberInput) -> Result<RememberOutcome> {
        if input.content.trim().is_empty() {
            return Err(EngramError::InvalidArgument(
                "content is required".to_string(),
            ));
        }
        if input.upsert && input.idempotency_key.is_none() {
            return Err(EngramError::InvalidArgument(
                "upsert requires idempotency_key".to_string(),
            ));
        }

        let flags = self.flags();

        // Scope fields take effect only while the flag is on; they are
        // accepted (and ignored) either way to stay wire-compatible
        let (scope_id, chat_id, thread_id, task_id) = if flags.scopes {
            (
                input.scope_id.clone(),
                input.chat_id.clone(),
                input.thread_id.clone(),
                input.task_id.clone(),
            )
        } else {
            (None, None, None, None)
        };
        let scope_key = flags.scope_key(input.scope_id.as_deref()).to_string();

        if input.upsert {
            let key = input
                .idempotency_key
                .as_deref()
                .expect("validated above");

            if let Some(existing) =
                self.storage()
                    .find_by_idempotency_key(key, scope_id.as_deref())?
            {
                return self.apply_upsert(&input, &existing.id, key, &scope_key);
            }
        // Not found: fall through to create with the supplied key
        } else if flags.idempotency {
            if let Some(key) = input.idempotency_key.as_deref() {
                match self.storage().get_idempotency(key, OP_REMEMBER, &scope_key) {
                    // Replay always reports the ledger's historical result
                    Ok(Some(prior)) => {
                        if let Some(id) = prior.get("id").and_then(|v| v.as_str()) {
                            return Ok(RememberOutcome {
                                id: id.to_string(),
                                status: WriteStatus::Created,
                            });
                        }
                        warn!("Ledger entry for '{}' lacks an id, treating as a miss", key);
                    }
                    Ok(None) => {}
                    Err(StorageError::CorruptLedger(key)) => {
                        warn!("Corrupt ledger entry for '{}', treating as a miss", key);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.create(&input, flags.idempotency, scope_id, chat_id, thread_id, task_id, &scope_key)
    }

    /// Branch A: full replace of an existing row found by (key, scope)
    fn apply_upsert(
        &self,
        input: &RememberInput,
        id: &str,
        key: &str,
        scope_key: &str,
    ) -> Result<RememberOutcome> {
        let embedding = self.try_embed(&input.content);

        self.storage().update_memory_content(
            id,
            ContentUpdate {
                content: input.content.clone(),
                category: input.category.clone(),
                metadata: input.metadata.clone(),
                embedding,
            },
        )?;

        self.storage().log_metric(
            &MetricEvent::new(MetricKind::Upsert)
                .session(input.session_id.as_deref())
                .memory(id),
        )?;

        let outcome = RememberOutcome {
            id: id.to_string(),
            status: WriteStatus::Updated,
        };
        self.storage().save_idempotency(
            key,
            OP_UPSERT,
            scope_key,
            &serde_json::to_value(&outcome).expect("outcome serializes"),
        )?;

        Ok(outcome)
    }

    /// Branch C: create a new row. The idempotency key is persisted on the
    /// row when the ledger flag is on or this create came from an upsert, so
    /// later upserts can find it even if the flag is off.
    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        input: &RememberInput,
        idempotency_enabled: bool,
        scope_id: Option<String>,
        chat_id: Option<String>,
        thread_id: Option<String>,
        task_id: Option<String>,
        scope_key: &str,
    ) -> Result<RememberOutcome> {
        let embedding = self.try_embed(&input.content);
        let store_key = if idempotency_enabled || input.upsert {
            input.idempotency_key.clone()
        } else {
            None
        };

        let created = match self.storage().create_memory(NewMemory {
            content: input.content.clone(),
            category: input.category.clone(),
            scope_id: scope_id.clone(),
            chat_id,
            thread_id,
            task_id,
            metadata: input.metadata.clone(),
            idempotency_key: store_key.clone(),
            embedding,
        }) {
            Ok(memory) => memory,
            // A crash after create but before the ledger save leaves the row
            // behind with no cached result; the unique (key, scope) index
            // rejects the re-create, so resolve the replay to the survivor
            Err(StorageError::Database(e))
                if is_constraint_violation(&e) && store_key.is_some() =>
            {
                let key = store_key.as_deref().expect("checked above");
                let existing = self
                    .storage()
                    .find_by_idempotency_key(key, scope_id.as_deref())?
                    .ok_or(StorageError::Database(e))?;
                let outcome = RememberOutcome {
                    id: existing.id,
                    status: WriteStatus::Created,
                };
                if idempotency_enabled {
                    self.storage().save_idempotency(
                        key,
                        OP_REMEMBER,
                        scope_key,
                        &serde_json::to_value(&outcome).expect("outcome serializes"),
                    )?;
                }
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        self.storage().log_metric(
            &MetricEvent::new(MetricKind::Remember)
                .session(input.session_id.as_deref())
                .memory(&created.id),
        )?;

        let outcome = RememberOutcome {
            id: created.id,
            status: WriteStatus::Created,
        };

        // Ledger save runs last so a crash in between leaves at worst a
        // missing ledger row, which a replay repairs by re-creating
        if idempotency_enabled {
            if let Some(key) = input.idempotency_key.as_deref() {
                self.storage().save_idempotency(
                    key,
                    OP_REMEMBER,
                    scope_key,
                    &serde_json::to_value(&outcome).expect("outcome serializes"),
                )?;
            }
        }

        Ok(outcome)
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FeatureFlags;
    use crate::config::Config;
    use tempfile::TempDir;

    fn engine_with_flags(flags: FeatureFlags) -> (Engram, TempDir) {
        let dir = TempDir::new().unwrap();
        // Model cache under a regular file: embeds fail, writes store no vectors
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let config = Config {
            db_path: dir.path().join("test.db"),
            data_dir: blocker.join("nested"),
            ..Config::from_env()
        };
        let engine = Engram::with_flags(config, flags).unwrap();
        (engine, dir)
    }

    fn test_engine() -> (Engram, TempDir) {
        engine_with_flags(FeatureFlags::all_enabled())
    }

    #[test]
    fn test_empty_content_rejected() {
        let (engine, _dir) = test_engine();
        let err = engine
            .remember(RememberInput {
                content: "   ".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngramError::InvalidArgument(_)));
    }

    #[test]
    fn test_upsert_without_key_rejected() {
        let (engine, _dir) = test_engine();
        let err = engine
            .remember(RememberInput {
                content: "x".to_string(),
                upsert: true,
                ..Default::default()
            })
            .unwrap_err();
        match err {
            EngramError::InvalidArgument(msg) => {
                assert!(msg.contains("upsert requires idempotency_key"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plain_create() {
        let (engine, _dir) = test_engine();
        let outcome = engine
            .remember(RememberInput {
                content: "plain".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome.status, WriteStatus::Created);

        let stored = engine.get(&outcome.id).unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
        assert!((stored.strength - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_idempotent_replay_returns_same_id() {
        let (engine, _dir) = test_engine();
        let input = RememberInput {
            content: "replayed".to_string(),
            idempotency_key: Some("k1".to_string()),
            ..Default::default()
        };

        let first = engine.remember(input.clone()).unwrap();
        let second = engine.remember(input).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, WriteStatus::Created);
        assert_eq!(engine.stats().unwrap().total_memories, 1);
    }

    #[test]
    fn test_ledger_isolated_by_scope() {
        let (engine, _dir) = test_engine();
        let p1 = engine
            .remember(RememberInput {
                content: "A".to_string(),
                scope_id: Some("a".to_string()),
                idempotency_key: Some("shared".to_string()),
                ..Default::default()
            })
            .unwrap();
        let p2 = engine
            .remember(RememberInput {
                content: "B".to_string(),
                scope_id: Some("b".to_string()),
                idempotency_key: Some("shared".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_ne!(p1.id, p2.id);
    }

    #[test]
    fn test_upsert_creates_then_updates_in_place() {
        let (engine, _dir) = test_engine();
        let first = engine
            .remember(RememberInput {
                content: "Original".to_string(),
                idempotency_key: Some("k1".to_string()),
                upsert: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.status, WriteStatus::Created);
        let before = engine.get(&first.id).unwrap().unwrap();

        let second = engine
            .remember(RememberInput {
                content: "Updated".to_string(),
                category: Some("decision".to_string()),
                idempotency_key: Some("k1".to_string()),
                upsert: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, WriteStatus::Updated);

        let after = engine.get(&first.id).unwrap().unwrap();
        assert_eq!(after.content, "Updated");
        assert_eq!(after.category.as_deref(), Some("decision"));
        // Identity and history preserved
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.access_count, before.access_count);
        assert!((after.strength - before.strength).abs() < f64::EPSILON);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn test_upsert_full_replace_nulls_omitted_fields() {
        let (engine, _dir) = test_engine();
        engine
            .remember(RememberInput {
                content: "With metadata".to_string(),
                category: Some("fact".to_string()),
                metadata: Some(serde_json::json!({"source": "test"})),
                idempotency_key: Some("k2".to_string()),
                upsert: true,
                ..Default::default()
            })
            .unwrap();

        let outcome = engine
            .remember(RememberInput {
                content: "Without metadata".to_string(),
                idempotency_key: Some("k2".to_string()),
                upsert: true,
                ..Default::default()
            })
            .unwrap();

        let stored = engine.get(&outcome.id).unwrap().unwrap();
        assert_eq!(stored.content, "Without metadata");
        assert!(stored.category.is_none());
        assert!(stored.metadata.is_none());
    }

    #[test]
    fn test_replay_after_upsert_reports_created() {
        let (engine, _dir) = test_engine();
        let key = Some("k3".to_string());

        let created = engine
            .remember(RememberInput {
                content: "v1".to_string(),
                idempotency_key: key.clone(),
                ..Default::default()
            })
            .unwrap();

        let updated = engine
            .remember(RememberInput {
                content: "v2".to_string(),
                idempotency_key: key.clone(),
                upsert: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.status, WriteStatus::Updated);

        // Non-upsert replay returns the ledger's historical create result
        let replayed = engine
            .remember(RememberInput {
                content: "v3".to_string(),
                idempotency_key: key,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(replayed.id, created.id);
        assert_eq!(replayed.status, WriteStatus::Created);
        // And the replay did not clobber the upserted content
        assert_eq!(engine.get(&created.id).unwrap().unwrap().content, "v2");
    }

    #[test]
    fn test_scopes_flag_off_stores_null_scopes() {
        let (engine, _dir) = engine_with_flags(FeatureFlags {
            scopes: false,
            ..FeatureFlags::all_enabled()
        });

        let outcome = engine
            .remember(RememberInput {
                content: "scope fields accepted but ignored".to_string(),
                scope_id: Some("A".to_string()),
                chat_id: Some("c".to_string()),
                ..Default::default()
            })
            .unwrap();

        let stored = engine.get(&outcome.id).unwrap().unwrap();
        assert!(stored.scope_id.is_none());
        assert!(stored.chat_id.is_none());
    }

    #[test]
    fn test_idempotency_flag_off_skips_ledger() {
        let (engine, _dir) = engine_with_flags(FeatureFlags {
            idempotency: false,
            ..FeatureFlags::all_enabled()
        });
        let input = RememberInput {
            content: "no ledger".to_string(),
            idempotency_key: Some("k1".to_string()),
            ..Default::default()
        };

        let first = engine.remember(input.clone()).unwrap();
        let second = engine.remember(input).unwrap();
        // Without the ledger every call creates a fresh row...
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_upsert_key_stored_even_when_idempotency_off() {
        let (engine, _dir) = engine_with_flags(FeatureFlags {
            idempotency: false,
            ..FeatureFlags::all_enabled()
        });

        // ...but an upsert still persists its key so it can find the row again
        let first = engine
            .remember(RememberInput {
                content: "v1".to_string(),
                idempotency_key: Some("k9".to_string()),
                upsert: true,
                ..Default::default()
            })
            .unwrap();
        let second = engine
            .remember(RememberInput {
                content: "v2".to_string(),
                idempotency_key: Some("k9".to_string()),
                upsert: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, WriteStatus::Updated);
    }

    #[test]
    fn test_malformed_ledger_entry_resolves_to_survivor() {
        let (engine, _dir) = test_engine();
        let input = RememberInput {
            content: "will be replayed".to_string(),
            idempotency_key: Some("k-corrupt".to_string()),
            ..Default::default()
        };
        let first = engine.remember(input.clone()).unwrap();

        engine
            .storage()
            .save_idempotency(
                "k-corrupt",
                "remember",
                "__global__",
                &serde_json::json!("scalar-not-object"),
            )
            .unwrap();

        // The entry parses but has no id, so the lookup is a miss; the
        // re-create then collides with the surviving row and resolves to it
        let second = engine.remember(input).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, WriteStatus::Created);
        assert_eq!(engine.stats().unwrap().total_memories, 1);
    }

    #[test]
    fn test_lost_ledger_row_replay_never_duplicates() {
        let (engine, _dir) = test_engine();
        let input = RememberInput {
            content: "crash between create and ledger save".to_string(),
            idempotency_key: Some("k-crash".to_string()),
            ..Default::default()
        };
        let first = engine.remember(input.clone()).unwrap();

        // Simulate the crash window: memory row exists, ledger row lost
        {
            use rusqlite::Connection;
            let conn = Connection::open(&engine.config().db_path).unwrap();
            conn.execute("DELETE FROM idempotency_keys WHERE key = 'k-crash'", [])
                .unwrap();
        }

        let second = engine.remember(input).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, WriteStatus::Created);
        assert_eq!(engine.stats().unwrap().total_memories, 1);
    }

    #[test]
    fn test_remember_metric_logged() {
        let (engine, _dir) = test_engine();
        engine
            .remember(RememberInput {
                content: "metered".to_string(),
                session_id: Some("s1".to_string()),
                ..Default::default()
            })
            .unwrap();

        let summary = engine.metrics_summary(Some("s1")).unwrap();
        assert_eq!(summary.total_remembers, 1);
    }
}
