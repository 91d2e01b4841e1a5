use async_trait::async_trait;
use serde::Serialize;

/// Voice metadata surfaced by the credential-check endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub name: String,
}

/// Speech-synthesis collaborator: reply text in, full audio payload out.
///
/// Implementations drain any upstream stream and return the concatenated
/// bytes; there is no partial or incremental audio delivery in this design.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>>;

    /// List available voices. Doubles as the credential check for
    /// `GET /verify-api`.
    async fn list_voices(&self) -> anyhow::Result<Vec<VoiceInfo>>;

    fn voice_id(&self) -> &str;
}
