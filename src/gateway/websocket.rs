//! Duplex channel: one WebSocket connection per browser tab.
//!
//! Each connection gets a fresh server-generated session id; nothing from a
//! previous connection is reattached except the last-reply replay frame. The
//! socket is split into a writer task fed by an unbounded channel and a reader
//! loop that routes inbound frames, so slow exchanges never block heartbeats.

use super::events::{ClientFrame, PONG, ServerFrame};
use super::AppState;
use crate::error::TransportError;
use crate::exchange::ExchangeResult;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let session_id = format!("ws-{}", Uuid::new_v4());
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let shutdown = Arc::new(Notify::new());

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    state.store.get_or_create(&session_id);
    state.registry.register(
        connection_id,
        &session_id,
        tx.clone(),
        Arc::clone(&shutdown),
    );
    tracing::info!(%connection_id, session_id, "duplex connection opened");

    let _ = tx.send(Message::Text(
        ServerFrame::info("Connected to Gizmo-101").to_json().into(),
    ));
    let replay = state
        .last_reply
        .lock()
        .expect("last reply poisoned")
        .clone();
    if let Some(message) = replay {
        let _ = tx.send(Message::Text(
            ServerFrame::MachineResponse { message }.to_json().into(),
        ));
    }

    loop {
        tokio::select! {
            () = shutdown.notified() => break,
            inbound = stream.next() => {
                let Some(Ok(msg)) = inbound else { break };
                match msg {
                    Message::Text(text) => {
                        route_frame(&state, connection_id, &session_id, text.as_str()).await;
                    }
                    Message::Ping(data) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.registry.unregister(connection_id);
    state.store.schedule_evict(&session_id, state.duplex_grace);
    drop(tx);
    writer.abort();
    tracing::info!(%connection_id, session_id, "duplex connection closed");
}

/// Route one inbound text frame. Exchange failures answer the origin with a
/// failure payload; the connection itself stays open.
async fn route_frame(state: &AppState, connection_id: Uuid, session_id: &str, text: &str) {
    if text == PONG {
        state.registry.pong(connection_id);
        return;
    }

    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Chat { message, broadcast }) => {
            let result = match state.orchestrator.run_exchange(session_id, &message, false).await {
                Ok(result) => {
                    state.remember_reply(&result.message);
                    result
                }
                Err(e) => {
                    tracing::error!(session_id, error = %e, "chat exchange failed");
                    ExchangeResult::failure("Failed to process chat message")
                }
            };
            let frame = ServerFrame::ChatResponse { result }.to_json();
            if broadcast {
                state.registry.broadcast(&frame, None);
            } else {
                state.registry.send_to(connection_id, &frame);
            }
        }
        Ok(ClientFrame::NarrativeStage { stage, reset }) => {
            let result = match state.orchestrator.run_stage(session_id, stage, reset).await {
                Ok(result) => {
                    state.remember_reply(&result.message);
                    result
                }
                Err(e) => {
                    tracing::error!(session_id, stage, error = %e, "narrative stage failed");
                    ExchangeResult::failure(e.to_string())
                }
            };
            let frame = ServerFrame::NarrativeResponse { result }.to_json();
            state.registry.send_to(connection_id, &frame);
        }
        Ok(ClientFrame::MachineIdClick { .. } | ClientFrame::MachineManualClick { .. }) => {
            state.registry.broadcast(text, Some(connection_id));
        }
        // Unknown frames are relayed verbatim to the other connections.
        Err(e) => {
            let err = TransportError::MalformedFrame(e.to_string());
            tracing::debug!(%connection_id, error = %err, "relaying unrecognized frame");
            state.registry.broadcast(text, Some(connection_id));
        }
    }
}
