//! Axum-based gateway: duplex WebSocket channel plus HTTP fallback routes.
//!
//! One process serves both transports. In split-port mode (`server.ws_port`
//! set) a second listener carries only the duplex route, for deployments that
//! terminate HTTP and WebSocket traffic separately.

mod handlers;
mod websocket;

pub mod events;
pub mod registry;

pub use handlers::ChatBody;

use handlers::{handle_chat, handle_health, handle_verify_api};
use registry::ConnectionRegistry;
use websocket::ws_handler;

use crate::config::Config;
use crate::exchange::Orchestrator;
use crate::narrative::NarrativeScript;
use crate::providers::{AnthropicProvider, TextProvider};
use crate::session::SessionStore;
use crate::speech::{ElevenLabsSpeech, SpeechProvider};
use anyhow::Result;
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::future::IntoFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (120s) — an exchange makes two upstream calls in sequence
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SessionStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub speech: Arc<dyn SpeechProvider>,
    /// Last assistant reply, replayed to reconnecting duplex clients.
    pub last_reply: Arc<Mutex<Option<String>>>,
    pub duplex_grace: Duration,
    pub synthetic_grace: Duration,
}

impl AppState {
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let script = Arc::new(match &config.narrative.script_path {
            Some(path) => NarrativeScript::load(path)?,
            None => NarrativeScript::builtin(),
        });
        let text: Arc<dyn TextProvider> = Arc::new(AnthropicProvider::new(&config.generation));
        let speech: Arc<dyn SpeechProvider> = Arc::new(ElevenLabsSpeech::new(&config.speech));
        let store = Arc::new(SessionStore::new(&script.system_prompt));
        let registry = Arc::new(ConnectionRegistry::new(
            Duration::from_secs(config.liveness.heartbeat_secs),
            config.liveness.missed_heartbeat_limit,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            text,
            Arc::clone(&speech),
            script,
        ));

        Ok(Self {
            orchestrator,
            store,
            registry,
            speech,
            last_reply: Arc::new(Mutex::new(None)),
            duplex_grace: Duration::from_secs(config.liveness.session_grace_secs),
            synthetic_grace: Duration::from_secs(config.liveness.synthetic_grace_secs),
        })
    }

    pub(crate) fn remember_reply(&self, message: &str) {
        if message.is_empty() {
            return;
        }
        *self.last_reply.lock().expect("last reply poisoned") = Some(message.to_string());
    }
}

/// Full route table. Exposed for integration tests that serve on an ephemeral
/// port.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/verify-api", get(handle_verify_api))
        .route("/chat", post(handle_chat))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
        .layer(CorsLayer::permissive())
}

/// Duplex-only route table for the split-port listener.
fn ws_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Run the gateway until the process is stopped.
pub async fn run_gateway(config: &Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    run_gateway_with_listener(config, listener).await
}

/// Run the gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    config: &Config,
    listener: tokio::net::TcpListener,
) -> Result<()> {
    let state = AppState::from_config(config)?;
    let app = router(state.clone());

    tracing::info!(addr = %listener.local_addr()?, "gateway listening");

    match config.server.ws_port {
        Some(ws_port) => {
            let ws_addr = format!("{}:{}", config.server.host, ws_port);
            let ws_listener = tokio::net::TcpListener::bind(&ws_addr).await?;
            tracing::info!(addr = %ws_listener.local_addr()?, "duplex listener (split-port mode)");
            tokio::try_join!(
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .into_future(),
                axum::serve(ws_listener, ws_router(state))
                    .with_graceful_shutdown(shutdown_signal())
                    .into_future(),
            )?;
        }
        None => {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn request_timeout_covers_both_upstream_calls() {
        assert_eq!(REQUEST_TIMEOUT_SECS, 120);
    }

    #[tokio::test]
    async fn state_builds_from_default_config() {
        let state = AppState::from_config(&Config::default()).unwrap();
        assert!(state.store.is_empty());
        assert_eq!(state.registry.active_count(), 0);
        assert_eq!(state.duplex_grace, Duration::from_secs(3600));
        assert_eq!(state.synthetic_grace, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn remember_reply_ignores_empty_messages() {
        let state = AppState::from_config(&Config::default()).unwrap();
        state.remember_reply("");
        assert!(state.last_reply.lock().unwrap().is_none());
        state.remember_reply("the machine hums");
        assert_eq!(
            state.last_reply.lock().unwrap().as_deref(),
            Some("the machine hums")
        );
    }
}
