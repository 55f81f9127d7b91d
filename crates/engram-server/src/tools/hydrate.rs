//! context_hydrate tool
//!
//! Recall shaped for session start: the query is optional, so a bare call
//! returns recent high-strength memories. Gated by its feature flag at
//! request time.

use serde_json::Value;
use std::sync::Arc;

use engram_core::{Engram, RecallInput};

use super::tool_error;

/// Input schema for the context_hydrate tool
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Optional focus query; omitted hydrates from recent memories"
            },
            "limit": {
                "type": "integer",
                "default": 10,
                "minimum": 1,
                "maximum": 100
            },
            "category": { "type": "string" },
            "min_strength": {
                "type": "number",
                "default": 0.1,
                "minimum": 0.0,
                "maximum": 1.0
            },
            "session_id": { "type": "string" },
            "scope_id": { "type": "string" },
            "chat_id": { "type": "string" },
            "thread_id": { "type": "string" },
            "task_id": { "type": "string" }
        }
    })
}

pub fn execute(engram: &Arc<Engram>, args: Option<Value>) -> Result<Value, String> {
    let mut input: RecallInput = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => RecallInput::default(),
    };
    input.limit = input.limit.clamp(1, 100);
    input.min_strength = input.min_strength.clamp(0.0, 1.0);

    let result = engram.hydrate(input).map_err(tool_error)?;
    serde_json::to_value(result).map_err(|e| e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
