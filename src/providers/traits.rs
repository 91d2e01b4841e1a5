use crate::session::Turn;
use async_trait::async_trait;

/// Text-generation collaborator: full chronological history in, reply out.
///
/// The system instruction travels separately from the message history, the
/// way hosted chat APIs separate the two channels; `history` must contain no
/// system turns and must not be reordered or deduplicated by implementations.
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate(&self, system_prompt: &str, history: &[Turn]) -> anyhow::Result<String>;
}
