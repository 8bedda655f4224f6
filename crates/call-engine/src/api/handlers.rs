use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::{agent_identity, AppState};
use crate::error::CallEngineError;
use crate::orchestrator::{
    AcceptOutcome, EndOutcome, EndRequest, EnqueueOutcome, StatusView, VoiceStatus, WaitingSession,
};
use crate::token::{CallToken, ROLE_CONSULTANT, ROLE_CUSTOMER};

/// Error body for hard failures
pub struct ApiError(CallEngineError);

impl From<CallEngineError> for ApiError {
    fn from(err: CallEngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self.0 {
            CallEngineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            CallEngineError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        if status.is_server_error() {
            error!(error = %self.0, "❌ Request failed");
        }
        (
            status,
            Json(json!({"ok": false, "reason": reason, "message": self.0.to_string()})),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQuery {
    pub consultant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingQuery {
    pub consultant_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub session_id: String,
}

/// POST /api/call/voice/enqueue/:session_id
pub async fn enqueue(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<EnqueueOutcome> {
    Json(state.orchestrator.enqueue(&session_id).await)
}

/// POST /api/call/voice/:session_id/end
pub async fn customer_end(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<EndOutcome>, ApiError> {
    let outcome = state.orchestrator.end(EndRequest::by_customer(session_id)).await?;
    Ok(Json(outcome))
}

/// GET /api/call/voice/:session_id/status
pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    Ok(Json(state.orchestrator.status(&session_id).await?))
}

/// GET /api/call/voice/:session_id/status-with-token
///
/// Same as `status`, plus a customer media token once the call is accepted.
pub async fn status_with_token(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let view = state.orchestrator.status(&session_id).await?;
    if view.status != VoiceStatus::Accepted {
        return Ok(Json(view).into_response());
    }

    let token: CallToken = state.tokens.issue(&view.session_id, Some(ROLE_CUSTOMER)).await?;
    Ok(Json(json!({
        "ok": true,
        "sessionId": view.session_id,
        "status": view.status,
        "consultantId": view.consultant_id,
        "token": token,
    }))
    .into_response())
}

/// GET /cs/call/voice/waiting?limit=
pub async fn waiting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WaitingQuery>,
) -> Result<Json<Vec<WaitingSession>>, Response> {
    let agent_id = agent_identity(&state, &headers, query.consultant_id.as_deref())
        .map_err(IntoResponse::into_response)?;
    let list = state
        .orchestrator
        .waiting_list(query.limit)
        .await
        .map_err(|e| ApiError(e).into_response())?;
    info!(agent_id = %agent_id, size = list.len(), "📋 Waiting list served");
    Ok(Json(list))
}

/// POST /cs/call/voice/:session_id/accept
pub async fn accept(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<AgentQuery>,
) -> Result<Json<AcceptOutcome>, Response> {
    let agent_id = agent_identity(&state, &headers, query.consultant_id.as_deref())
        .map_err(IntoResponse::into_response)?;
    Ok(Json(state.orchestrator.accept(&session_id, &agent_id).await))
}

/// POST /cs/call/voice/:session_id/end
pub async fn agent_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<AgentQuery>,
) -> Result<Json<EndOutcome>, Response> {
    let agent_id = agent_identity(&state, &headers, query.consultant_id.as_deref())
        .map_err(IntoResponse::into_response)?;
    let outcome = state
        .orchestrator
        .end(EndRequest::by_agent(session_id, agent_id))
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(outcome))
}

/// POST /cs/call/token
///
/// The role is always `CONSULTANT`; agents cannot pick one.
pub async fn agent_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AgentQuery>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<CallToken>, Response> {
    let agent_id = agent_identity(&state, &headers, query.consultant_id.as_deref())
        .map_err(IntoResponse::into_response)?;
    let token = state
        .tokens
        .issue(&request.session_id, Some(ROLE_CONSULTANT))
        .await
        .map_err(|e| ApiError(e).into_response())?;
    info!(agent_id = %agent_id, session_id = %request.session_id, "🎟️ Agent token issued");
    Ok(Json(token))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().ping().await {
        Ok(()) => Json(json!({
            "status": "ok",
            "agentsConnected": state.registry.agent_count(),
            "customersConnected": state.registry.customer_count(),
            "fanout": state.orchestrator.fanout().stats(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "⚠️ Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "error": e.to_string()})),
            )
                .into_response()
        }
    }
}
