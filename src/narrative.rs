//! Narrative content as configuration.
//!
//! The system prompt and staged prompts are pure data loaded once at startup:
//! a built-in script, overridable by a TOML file. The orchestrator only reads
//! stages by integer index.

use crate::error::{ConfigError, NarrativeError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One scripted step of the multi-turn narrative.
///
/// Only `prompt` feeds the model; the rest is descriptive metadata carried for
/// front-end use (button labels, on-screen copy, authoring notes).
#[derive(Debug, Clone, Deserialize)]
pub struct StageDescriptor {
    pub prompt: String,
    #[serde(default)]
    pub button_text: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub required_elements: Vec<String>,
}

/// Immutable narrative script: system prompt plus ordered stage descriptors.
#[derive(Debug, Clone, Deserialize)]
pub struct NarrativeScript {
    pub system_prompt: String,
    #[serde(default)]
    pub stages: Vec<StageDescriptor>,
}

/// Built-in Gizmo-101 script, shipped with the binary.
const BUILTIN_SCRIPT: &str = include_str!("narrative_builtin.toml");

impl NarrativeScript {
    /// The script compiled into the binary.
    pub fn builtin() -> Self {
        toml::from_str(BUILTIN_SCRIPT).expect("built-in narrative script is valid TOML")
    }

    /// Load a script from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        let script: NarrativeScript = toml::from_str(&raw)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        if script.system_prompt.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{}: system_prompt must not be empty",
                path.display()
            )));
        }
        Ok(script)
    }

    /// Indexed stage lookup. The only failure mode of narrative routing.
    pub fn stage(&self, index: usize) -> Result<&StageDescriptor, NarrativeError> {
        self.stages.get(index).ok_or(NarrativeError::InvalidStageIndex {
            index,
            count: self.stages.len(),
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
