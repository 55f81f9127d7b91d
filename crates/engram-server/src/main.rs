//! Engram tool server - memory for AI coding agents over stdio
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout for agent harnesses:
//! `list_tools` describes the surface, `call_tool` dispatches `remember`,
//! `recall`, `forget`, `capabilities`, and (when enabled) `context_hydrate`.
//! All logging goes to stderr so stdout stays clean for protocol frames.

use std::io;
use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use engram_core::{Config, Engram};
use engram_server::protocol::stdio::StdioTransport;
use engram_server::server::ToolServer;

fn parse_args() {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("Engram tool server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Memory store for AI coding agents, JSON-RPC over stdio.");
                println!();
                println!("USAGE:");
                println!("    engram-mcp");
                println!();
                println!("ENVIRONMENT:");
                println!("    ENGRAM_DB_PATH          Database file path");
                println!("    ENGRAM_EMBEDDING_MODEL  Embedding model identifier");
                println!("    ENGRAM_ENABLE_SCOPES    \"1\" enables scope isolation");
                println!("    RUST_LOG                Log level filter (debug, info, warn, error)");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("engram-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'engram-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
    }
}

fn main() {
    parse_args();

    // Logging to stderr (stdout is for JSON-RPC)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Engram tool server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    let engram = match Engram::new(config) {
        Ok(engine) => {
            info!("Storage initialized successfully");
            if engine.embedder_ready() {
                info!("Embedding model ready");
            } else {
                warn!("Embedding model unavailable; recall will use full-text search");
            }
            Arc::new(engine)
        }
        Err(e) => {
            error!("Failed to initialize engine: {}", e);
            std::process::exit(1);
        }
    };

    let server = ToolServer::new(engram);
    let transport = StdioTransport::new();

    info!("Serving tools on stdio...");

    if let Err(e) = transport.run(server) {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Engram tool server shutting down");
}
