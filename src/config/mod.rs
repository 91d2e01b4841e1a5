pub mod schema;

pub use schema::{
    Config, GenerationConfig, LivenessConfig, NarrativeConfig, ServerConfig, SpeechConfig,
};
