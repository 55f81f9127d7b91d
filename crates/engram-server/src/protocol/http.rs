//! HTTP transport
//!
//! JSON API over axum for plugins and the CLI. CORS is open so local editor
//! plugins can call straight from a webview. Errors are always
//! `{"error": message}` with the status carrying the taxonomy: 400 invalid
//! input, 403 disabled feature, 404 unknown route, 500 unexpected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use engram_core::{Engram, EngramError, ForgetInput, RecallInput, RememberInput};

/// Shared application state
struct AppState {
    engram: Arc<Engram>,
    started: Instant,
}

/// Build the axum router with all API routes
pub fn build_router(engram: Arc<Engram>) -> Router {
    let state = Arc::new(AppState {
        engram,
        started: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
        .route("/remember", post(remember))
        .route("/recall", post(recall))
        .route("/forget", post(forget))
        .route("/context/hydrate", post(hydrate))
        .fallback(not_found)
        .layer(ServiceBuilder::new().concurrency_limit(64).layer(cors))
        .with_state(state)
}

/// Run the HTTP server until ctrl-c or SIGTERM
pub async fn run(engram: Arc<Engram>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(engram);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Engram HTTP API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Engram HTTP API shutting down");
    Ok(())
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "version": engram_core::VERSION,
        "uptime_s": state.started.elapsed().as_secs(),
    }))
    .into_response()
}

async fn capabilities(State(state): State<Arc<AppState>>) -> Response {
    Json(state.engram.capabilities()).into_response()
}

async fn remember(State(state): State<Arc<AppState>>, body: String) -> Response {
    let input: RememberInput = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &format!("Invalid body: {}", e)),
    };
    match state.engram.remember(input) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn recall(State(state): State<Arc<AppState>>, body: String) -> Response {
    let input: RecallInput = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &format!("Invalid body: {}", e)),
    };
    match state.engram.recall(input) {
        Ok(result) => Json(result).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn forget(State(state): State<Arc<AppState>>, body: String) -> Response {
    let input: ForgetInput = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &format!("Invalid body: {}", e)),
    };
    match state.engram.forget(input) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn hydrate(State(state): State<Arc<AppState>>, body: String) -> Response {
    // The query is optional here; an empty body hydrates from recent memories
    let input: RecallInput = if body.trim().is_empty() {
        RecallInput::default()
    } else {
        match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                return error_body(StatusCode::BAD_REQUEST, &format!("Invalid body: {}", e))
            }
        }
    };
    match state.engram.hydrate(input) {
        Ok(result) => Json(result).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn not_found() -> Response {
    error_body(StatusCode::NOT_FOUND, "not found")
}

// ============================================================================
// ERROR SHAPING
// ============================================================================

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn engine_error(e: EngramError) -> Response {
    let status = match &e {
        EngramError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        EngramError::NotFound(_) => StatusCode::NOT_FOUND,
        EngramError::FeatureDisabled(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, &e.to_string())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// ============================================================================
// TESTS
// ============================================================================
