pub mod elevenlabs;
pub mod traits;

pub use elevenlabs::ElevenLabsSpeech;
pub use traits::{SpeechProvider, VoiceInfo};
