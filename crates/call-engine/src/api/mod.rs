//! # HTTP and WebSocket binding
//!
//! A thin axum layer over [`LifecycleOrchestrator`]. Authentication happens at
//! the gateway in front of this service; agent routes read the authenticated
//! agent id from the `x-consultant-id` header.
//!
//! | Method | Path                                        | Caller   |
//! |--------|---------------------------------------------|----------|
//! | POST   | `/api/call/voice/enqueue/:session_id`       | customer |
//! | POST   | `/api/call/voice/:session_id/end`           | customer |
//! | GET    | `/api/call/voice/:session_id/status`        | customer |
//! | GET    | `/api/call/voice/:session_id/status-with-token` | customer |
//! | GET    | `/cs/call/voice/waiting?limit=`             | agent    |
//! | POST   | `/cs/call/voice/:session_id/accept`         | agent    |
//! | POST   | `/cs/call/voice/:session_id/end`            | agent    |
//! | POST   | `/cs/call/token`                            | agent    |
//! | GET    | `/ws/call/agent`                            | agent    |
//! | GET    | `/ws/call/customer?voiceSessionId=`         | customer |
//! | GET    | `/health`                                   | probes   |
//!
//! Business rejections are `200 {ok:false, reason}`. A missing agent identity
//! is `401 {ok:false, reason:"UNAUTHORIZED"}`.

pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::notify::ChannelRegistry;
use crate::orchestrator::LifecycleOrchestrator;
use crate::token::CallTokenService;

/// Header carrying the agent id set by the authenticating gateway
pub const AGENT_ID_HEADER: &str = "x-consultant-id";

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub tokens: Arc<CallTokenService>,
    pub registry: ChannelRegistry,
    /// Accept `?consultantId=` when no header is present. Development only.
    pub allow_query_agent_id: bool,
}

impl AppState {
    pub fn new(orchestrator: LifecycleOrchestrator, tokens: CallTokenService, registry: ChannelRegistry) -> Self {
        let allow_query_agent_id = orchestrator.config().server.allow_query_agent_id;
        Self {
            orchestrator: Arc::new(orchestrator),
            tokens: Arc::new(tokens),
            registry,
            allow_query_agent_id,
        }
    }
}

pub type ApiRejection = (StatusCode, Json<Value>);

/// Resolve the calling agent from the gateway header, or from the query
/// parameter when that is allowed.
pub fn agent_identity(
    state: &AppState,
    headers: &HeaderMap,
    query_agent_id: Option<&str>,
) -> Result<String, ApiRejection> {
    let from_header = headers
        .get(AGENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(agent_id) = from_header {
        return Ok(agent_id.to_string());
    }

    if state.allow_query_agent_id {
        if let Some(agent_id) = query_agent_id.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(agent_id.to_string());
        }
    }

    Err((
        StatusCode::UNAUTHORIZED,
        Json(json!({"ok": false, "reason": "UNAUTHORIZED"})),
    ))
}

/// Build the axum router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/call/voice/enqueue/:session_id", post(handlers::enqueue))
        .route("/api/call/voice/:session_id/end", post(handlers::customer_end))
        .route("/api/call/voice/:session_id/status", get(handlers::status))
        .route(
            "/api/call/voice/:session_id/status-with-token",
            get(handlers::status_with_token),
        )
        .route("/cs/call/voice/waiting", get(handlers::waiting))
        .route("/cs/call/voice/:session_id/accept", post(handlers::accept))
        .route("/cs/call/voice/:session_id/end", post(handlers::agent_end))
        .route("/cs/call/token", post(handlers::agent_token))
        .route("/ws/call/agent", get(ws::agent_socket))
        .route("/ws/call/customer", get(ws::customer_socket))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
