//! capabilities tool

use serde_json::Value;
use std::sync::Arc;

use engram_core::Engram;

/// Input schema for the capabilities tool (no parameters)
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub fn execute(engram: &Arc<Engram>, _args: Option<Value>) -> Result<Value, String> {
    serde_json::to_value(engram.capabilities()).map_err(|e| e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================
