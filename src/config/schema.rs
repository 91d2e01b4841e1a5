use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml — computed at load time, not serialized
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub narrative: NarrativeConfig,
}

// ── Server binding ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Split-port deployment: serve the WebSocket endpoint from a second
    /// listener instead of the same-port `/ws` upgrade.
    #[serde(default)]
    pub ws_port: Option<u16>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3003
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_port: None,
        }
    }
}

// ── Text generation ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Resolved from ANTHROPIC_API_KEY when unset in the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

// ── Speech synthesis ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Resolved from ELEVENLABS_API_KEY when unset in the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_speech_model")]
    pub model_id: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_voice_id() -> String {
    "XB0fDUnXU5powFXDhCwa".to_string()
}

fn default_speech_model() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_output_format() -> String {
    "mp3_44100_128".to_string()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: default_voice_id(),
            model_id: default_speech_model(),
            output_format: default_output_format(),
        }
    }
}

// ── Liveness / eviction timers ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Heartbeat probe interval for open duplex connections.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Consecutive missed heartbeats before a connection is force-closed.
    #[serde(default = "default_missed_limit")]
    pub missed_heartbeat_limit: u32,
    /// Grace before a duplex session is evicted after its connection closes.
    #[serde(default = "default_session_grace_secs")]
    pub session_grace_secs: u64,
    /// Lifetime of synthetic sessions created by the HTTP fallback.
    #[serde(default = "default_synthetic_grace_secs")]
    pub synthetic_grace_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    50
}

fn default_missed_limit() -> u32 {
    2
}

fn default_session_grace_secs() -> u64 {
    3600
}

fn default_synthetic_grace_secs() -> u64 {
    60
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            missed_heartbeat_limit: default_missed_limit(),
            session_grace_secs: default_session_grace_secs(),
            synthetic_grace_secs: default_synthetic_grace_secs(),
        }
    }
}

// ── Narrative content ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeConfig {
    /// Optional TOML script overriding the built-in narrative content.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
}

impl Config {
    /// Load config from an optional TOML file, then apply environment
    /// overrides for secrets and the listen port.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .map_err(|e| ConfigError::Load(format!("{}: {e}", p.display())))?;
                let mut parsed: Config = toml::from_str(&raw)
                    .map_err(|e| ConfigError::Load(format!("{}: {e}", p.display())))?;
                parsed.config_path = Some(p.to_path_buf());
                parsed
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env("ANTHROPIC_API_KEY") {
            self.generation.api_key = Some(key);
        }
        if let Some(key) = non_empty_env("ELEVENLABS_API_KEY") {
            self.speech.api_key = Some(key);
        }
        if let Some(port) = non_empty_env("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::Validation(format!(
                "generation.temperature must be within 0.0..=2.0, got {}",
                self.generation.temperature
            )));
        }
        if self.generation.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "generation.max_tokens must be positive".into(),
            ));
        }
        if self.liveness.heartbeat_secs == 0 {
            return Err(ConfigError::Validation(
                "liveness.heartbeat_secs must be positive".into(),
            ));
        }
        if self.liveness.missed_heartbeat_limit == 0 {
            return Err(ConfigError::Validation(
                "liveness.missed_heartbeat_limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_observed_deployment() {
        let config = Config::default();
        assert_eq!(config.server.port, 3003);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.ws_port.is_none());
        assert_eq!(config.generation.model, "claude-3-5-sonnet-20241022");
        assert_eq!(config.generation.max_tokens, 100);
        assert!((config.generation.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.speech.model_id, "eleven_multilingual_v2");
        assert_eq!(config.speech.output_format, "mp3_44100_128");
        assert_eq!(config.liveness.heartbeat_secs, 50);
        assert_eq!(config.liveness.session_grace_secs, 3600);
        assert_eq!(config.liveness.synthetic_grace_secs, 60);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [server]
            port = 10000

            [speech]
            voice_id = "custom-voice"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 10000);
        assert_eq!(parsed.speech.voice_id, "custom-voice");
        assert_eq!(parsed.speech.model_id, "eleven_multilingual_v2");
        assert_eq!(parsed.liveness.heartbeat_secs, 50);
    }

    #[test]
    fn load_from_file_records_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8088\nws_port = 8089").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.ws_port, Some(8089));
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn load_missing_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = Config::default();
        config.generation.temperature = 3.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn zero_heartbeat_rejected() {
        let mut config = Config::default();
        config.liveness.heartbeat_secs = 0;
        assert!(config.validate().is_err());
    }
}
