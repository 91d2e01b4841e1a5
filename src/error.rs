use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for the gateway.
///
/// Each subsystem defines its own error variant. Transport adapters match on
/// these to render structured failure payloads; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum GizmoError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Exchange (upstream calls) ───────────────────────────────────────
    #[error("exchange: {0}")]
    Exchange(#[from] ExchangeError),

    // ── Session ─────────────────────────────────────────────────────────
    #[error("session: {0}")]
    Session(#[from] SessionError),

    // ── Narrative script ────────────────────────────────────────────────
    #[error("narrative: {0}")]
    Narrative(#[from] NarrativeError),

    // ── Transport ───────────────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Exchange errors ────────────────────────────────────────────────────────

/// Failures of the two external collaborators sequenced by an exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("text generation failed: {0}")]
    UpstreamText(String),

    #[error("speech synthesis failed: {0}")]
    UpstreamSpeech(String),
}

// ─── Session errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

// ─── Narrative errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("stage {index} out of range (script has {count} stages)")]
    InvalidStageIndex { index: usize, count: usize },
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to closed connection {0}")]
    ClosedConnection(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, GizmoError>;
