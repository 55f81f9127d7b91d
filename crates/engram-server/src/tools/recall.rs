//! recall tool
//!
//! Ranked retrieval with semantic search and full-text fallback.

use serde_json::Value;
use std::sync::Arc;

use engram_core::{Engram, RecallInput};

use super::tool_error;

/// Input schema for the recall tool
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural-language query; empty returns recent memories"
            },
            "limit": {
                "type": "integer",
                "description": "Maximum number of results (default: 10)",
                "default": 10,
                "minimum": 1,
                "maximum": 100
            },
            "category": {
                "type": "string",
                "description": "Only return memories with this category hint"
            },
            "min_strength": {
                "type": "number",
                "description": "Minimum effective strength (0.0-1.0, default: 0.1)",
                "default": 0.1,
                "minimum": 0.0,
                "maximum": 1.0
            },
            "session_id": { "type": "string" },
            "scope_id": { "type": "string" },
            "chat_id": { "type": "string" },
            "thread_id": { "type": "string" },
            "task_id": { "type": "string" }
        },
        "required": ["query"]
    })
}

pub fn execute(engram: &Arc<Engram>, args: Option<Value>) -> Result<Value, String> {
    let mut input: RecallInput = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    input.limit = input.limit.clamp(1, 100);
    input.min_strength = input.min_strength.clamp(0.0, 1.0);

    let result = engram.recall(input).map_err(tool_error)?;
    serde_json::to_value(result).map_err(|e| e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
