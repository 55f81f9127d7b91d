//! Tool server core
//!
//! Routes JSON-RPC requests to tool handlers. The tool list is computed per
//! request from the capability gate, so feature flags toggle without a
//! restart.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use engram_core::Engram;

use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::tools;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// A tool made available to callers
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Parameters of a `call_tool` request
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Result of a `list_tools` request
#[derive(Debug, Clone, Serialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescription>,
}

// ============================================================================
// SERVER
// ============================================================================

/// Tool server implementation
pub struct ToolServer {
    engram: Arc<Engram>,
}

impl ToolServer {
    pub fn new(engram: Arc<Engram>) -> Self {
        Self { engram }
    }

    /// Handle an incoming JSON-RPC request
    pub fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Handling request: {}", request.method);

        let result = match request.method.as_str() {
            "list_tools" => self.handle_list_tools(),
            "call_tool" => self.handle_call_tool(request.params),
            "ping" => Ok(serde_json::json!({})),
            method => {
                warn!("Unknown method: {}", method);
                Err(JsonRpcError::method_not_found())
            }
        };

        match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        }
    }

    /// Handle list_tools: the tool set mirrors the capability document
    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let capabilities = self.engram.capabilities();

        let mut tools = vec![
            ToolDescription {
                name: "remember".to_string(),
                description: Some(
                    "Store a memory. Supports category hints, scope isolation, structured \
                     metadata, idempotency keys, and create-or-replace upsert."
                        .to_string(),
                ),
                input_schema: tools::remember::schema(),
            },
            ToolDescription {
                name: "recall".to_string(),
                description: Some(
                    "Retrieve ranked memories for a natural-language query. Semantic search \
                     with full-text fallback; an empty query returns recent memories."
                        .to_string(),
                ),
                input_schema: tools::recall::schema(),
            },
            ToolDescription {
                name: "forget".to_string(),
                description: Some(
                    "Delete a memory by id, honoring scope isolation when enabled.".to_string(),
                ),
                input_schema: tools::forget::schema(),
            },
            ToolDescription {
                name: "capabilities".to_string(),
                description: Some(
                    "Report enabled features and the currently exposed tool set.".to_string(),
                ),
                input_schema: tools::capabilities::schema(),
            },
        ];

        if capabilities.context_hydration {
            tools.push(ToolDescription {
                name: "context_hydrate".to_string(),
                description: Some(
                    "Hydrate session context: like recall, but the query is optional and \
                     defaults to recent memories."
                        .to_string(),
                ),
                input_schema: tools::hydrate::schema(),
            });
        }

        let result = ListToolsResult { tools };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    /// Handle call_tool: dispatch by name. Validation failures come back as
    /// structured errors, never a broken connection.
    fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool call parameters")),
        };

        let result = match request.name.as_str() {
            "remember" => tools::remember::execute(&self.engram, request.arguments),
            "recall" => tools::recall::execute(&self.engram, request.arguments),
            "forget" => tools::forget::execute(&self.engram, request.arguments),
            "capabilities" => tools::capabilities::execute(&self.engram, request.arguments),
            "context_hydrate" => tools::hydrate::execute(&self.engram, request.arguments),
            name => {
                warn!("Unknown tool: {}", name);
                return Err(JsonRpcError::invalid_params(&format!(
                    "Unknown tool: {}",
                    name
                )));
            }
        };

        result.map_err(|e| JsonRpcError::invalid_params(&e))
    }
}

// ============================================================================
// TESTS
// ============================================================================
