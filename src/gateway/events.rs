//! JSON frame vocabulary of the duplex channel.
//!
//! Heartbeats are the literal strings `"ping"` and `"pong"`, not JSON; any
//! inbound text that parses as neither pong nor a known frame is relayed
//! verbatim to the other connections (legacy dumb-pipe behavior).

use crate::exchange::ExchangeResult;
use serde::{Deserialize, Serialize};

/// Heartbeat probe sent by the server.
pub const PING: &str = "ping";
/// Heartbeat acknowledgement sent by the client.
pub const PONG: &str = "pong";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        message: String,
        #[serde(default)]
        broadcast: bool,
    },
    NarrativeStage {
        stage: usize,
        #[serde(default)]
        reset: bool,
    },
    MachineIdClick {
        action: String,
    },
    MachineManualClick {
        action: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Info {
        message: String,
    },
    /// Replay of the last assistant reply, sent on (re)connect.
    MachineResponse {
        message: String,
    },
    ChatResponse {
        #[serde(flatten)]
        result: ExchangeResult,
    },
    NarrativeResponse {
        #[serde(flatten)]
        result: ExchangeResult,
    },
}

impl ServerFrame {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("failed to serialize server frame: {e}");
            format!(r#"{{"type":"info","message":"serialization error: {e}"}}"#)
        })
    }
}
