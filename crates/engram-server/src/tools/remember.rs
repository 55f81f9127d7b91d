//! remember tool
//!
//! Durable, retry-safe memory writes.

use serde_json::Value;
use std::sync::Arc;

use engram_core::{Engram, RememberInput};

use super::tool_error;

/// Input schema for the remember tool
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "The memory text to store"
            },
            "category": {
                "type": "string",
                "description": "Optional category hint: decision, pattern, fact, preference, insight"
            },
            "scope_id": {
                "type": "string",
                "description": "Isolation scope; ignored while the scopes feature is disabled"
            },
            "chat_id": { "type": "string" },
            "thread_id": { "type": "string" },
            "task_id": { "type": "string" },
            "metadata": {
                "type": "object",
                "description": "Caller-interpreted key/value map"
            },
            "idempotency_key": {
                "type": "string",
                "description": "Stable identity for retry-safe writes and upserts"
            },
            "upsert": {
                "type": "boolean",
                "description": "Create-or-replace by idempotency_key (requires idempotency_key)",
                "default": false
            },
            "session_id": { "type": "string" }
        },
        "required": ["content"]
    })
}

pub fn execute(engram: &Arc<Engram>, args: Option<Value>) -> Result<Value, String> {
    let input: RememberInput = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    let outcome = engram.remember(input).map_err(tool_error)?;
    serde_json::to_value(outcome).map_err(|e| e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
