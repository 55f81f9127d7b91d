//! Tool handlers
//!
//! One module per tool; each exposes a JSON schema and an execute entry
//! point. Handlers stay thin: parse arguments, call the engine, shape the
//! response.

pub mod capabilities;
pub mod forget;
pub mod hydrate;
pub mod recall;
pub mod remember;

use engram_core::EngramError;

/// Translate an engine error into a tool-facing message
pub(crate) fn tool_error(e: EngramError) -> String {
    e.to_string()
}
