//! Transports
//!
//! The same operations exposed over two surfaces: JSON-RPC 2.0 over stdio
//! for agent harnesses, and an HTTP/JSON API for plugins and the CLI.

pub mod http;
pub mod stdio;
pub mod types;
