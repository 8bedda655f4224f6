//! Push channel sockets.
//!
//! Each socket registers one channel in the [`ChannelRegistry`] and forwards
//! whatever the fan-out dispatcher puts into it. Client frames are ignored
//! apart from close.
//!
//! [`ChannelRegistry`]: crate::notify::ChannelRegistry

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::handlers::AgentQuery;
use crate::api::{agent_identity, AppState};
use crate::notify::Registration;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSocketQuery {
    pub voice_session_id: Option<String>,
}

/// GET /ws/call/agent
pub async fn agent_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AgentQuery>,
) -> Response {
    let agent_id = match agent_identity(&state, &headers, query.consultant_id.as_deref()) {
        Ok(agent_id) => agent_id,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let registration = state.registry.register_agent(&agent_id);
        let connection_id = registration.connection_id;
        info!(agent_id = %agent_id, %connection_id, "🔌 Agent socket connected");

        pump(socket, registration).await;

        state.registry.unregister_agent(&agent_id, connection_id);
        info!(agent_id = %agent_id, %connection_id, "🔌 Agent socket closed");
    })
}

/// GET /ws/call/customer?voiceSessionId=
pub async fn customer_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<CustomerSocketQuery>,
) -> Response {
    let session_id = match query
        .voice_session_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(session_id) => session_id.to_string(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "reason": "SESSION_ID_REQUIRED"})),
            )
                .into_response()
        }
    };

    ws.on_upgrade(move |socket| async move {
        let registration = state.registry.register_customer(&session_id);
        let connection_id = registration.connection_id;
        info!(session_id = %session_id, %connection_id, "🔌 Customer socket connected");

        pump(socket, registration).await;

        state.registry.unregister_customer(&session_id, connection_id);
        info!(session_id = %session_id, %connection_id, "🔌 Customer socket closed");
    })
}

/// Forward pushed events until either side goes away
async fn pump(mut socket: WebSocket, mut registration: Registration) {
    loop {
        tokio::select! {
            pushed = registration.receiver.recv() => {
                let Some(payload) = pushed else {
                    // replaced by a newer registration under the same key
                    debug!(connection_id = %registration.connection_id, "Push channel superseded");
                    break;
                };
                if let Err(e) = socket.send(Message::Text(payload)).await {
                    warn!(connection_id = %registration.connection_id, error = %e, "⚠️ Socket send failed");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(connection_id = %registration.connection_id, error = %e, "⚠️ Socket receive error");
                        break;
                    }
                }
            }
        }
    }
    let _ = socket.close().await;
}
