//! forget tool
//!
//! Scope-aware deletion. Missing memories report `deleted: false` rather
//! than an error.

use serde_json::Value;
use std::sync::Arc;

use engram_core::{Engram, ForgetInput};

use super::tool_error;

/// Input schema for the forget tool
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {
                "type": "string",
                "description": "Memory id to delete"
            },
            "scope_id": {
                "type": "string",
                "description": "With scopes enabled, only a memory in this scope is deleted; \
                                omitted means only unscoped memories match"
            },
            "session_id": { "type": "string" }
        },
        "required": ["id"]
    })
}

pub fn execute(engram: &Arc<Engram>, args: Option<Value>) -> Result<Value, String> {
    let input: ForgetInput = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    let outcome = engram.forget(input).map_err(tool_error)?;
    serde_json::to_value(outcome).map_err(|e| e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{Config, FeatureFlags, RememberInput};
    use tempfile::TempDir;

    fn test_engine() -> (Arc<Engram>, TempDir) {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let config = Config {
            db_path: dir.path().join("test.db"),
            data_dir: blocker.join("nested"),
            ..Config::from_env()
        };
        let engram =
            Arc::new(Engram::with_flags(config, FeatureFlags::all_enabled()).unwrap());
        (engram, dir)
    }

    #[test]
    fn test_missing_id_fails() {
        let (engram, _dir) = test_engine();
        let result = execute(&engram, Some(serde_json::json!({})));
        assert!(result.unwrap_err().contains("Invalid arguments"));
    }

    #[test]
    fn test_delete_existing_unscoped() {
        let (engram, _dir) = test_engine();
        let id = engram
            .remember(RememberInput {
                content: "to be forgotten".to_string(),
                ..Default::default()
            })
            .unwrap()
            .id;

        let value = execute(&engram, Some(serde_json::json!({"id": id}))).unwrap();
        assert_eq!(value["deleted"], true);
    }

    #[test]
    fn test_missing_memory_reports_false_not_error() {
        let (engram, _dir) = test_engine();
        let value =
            execute(&engram, Some(serde_json::json!({"id": "no-such-id"}))).unwrap();
        assert_eq!(value["deleted"], false);
        assert_eq!(value["id"], "no-such-id");
    }
}
