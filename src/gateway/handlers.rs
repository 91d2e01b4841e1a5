//! HTTP fallback handlers: used by clients whose duplex channel is down.

use super::AppState;
use super::events::ServerFrame;
use crate::exchange::ExchangeResult;
use crate::session::Turn;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

/// Fallback chat request. `conversationHistory` carries the client's own
/// transcript so a synthetic session can resume where the duplex one left off.
#[derive(serde::Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default, rename = "conversationHistory")]
    pub conversation_history: Vec<Turn>,
}

/// GET /health — liveness probe.
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "activeConnections": state.registry.active_count(),
        "sessions": state.store.len(),
    });
    Json(body)
}

/// GET /verify-api — check the speech credential by listing voices.
pub(super) async fn handle_verify_api(State(state): State<AppState>) -> impl IntoResponse {
    match state.speech.list_voices().await {
        Ok(voices) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "API key is valid",
                "voices": voices,
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "speech credential check failed");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Invalid API key" })),
            )
        }
    }
}

/// POST /chat — one full exchange over a synthetic single-shot session.
///
/// The session lives only for this request plus a short grace window; the
/// client re-sends its transcript on every call. Successful replies are also
/// broadcast to open duplex connections so other tabs stay in sync.
pub(super) async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    let session_id = format!("http-{}", Uuid::new_v4());
    if !body.conversation_history.is_empty() {
        state.store.seed(&session_id, body.conversation_history);
    }

    let outcome = state
        .orchestrator
        .run_exchange(&session_id, &body.message, false)
        .await;
    state
        .store
        .schedule_evict(&session_id, state.synthetic_grace);

    match outcome {
        Ok(result) => {
            state.remember_reply(&result.message);
            let frame = ServerFrame::ChatResponse {
                result: result.clone(),
            }
            .to_json();
            state.registry.broadcast(&frame, None);
            (StatusCode::OK, Json(result))
        }
        Err(e) => {
            tracing::error!(session_id, error = %e, "fallback chat exchange failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExchangeResult::failure("Failed to process chat message")),
            )
        }
    }
}
