//! Exchange orchestration: the single place the two external calls are
//! sequenced and combined failure is handled. Both transport adapters (duplex
//! and HTTP fallback) delegate here.

use crate::error::{ExchangeError, Result};
use crate::narrative::NarrativeScript;
use crate::providers::TextProvider;
use crate::session::{SessionStore, Turn, TurnRole};
use crate::speech::SpeechProvider;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Wire-level result of one exchange. Transient: constructed per exchange,
/// never stored. Field names match the browser protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Base64-encoded audio; absent when synthesis failed (degraded reply).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        default,
        rename = "conversationHistory",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub conversation_history: Vec<Turn>,
}

impl ExchangeResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: String::new(),
            audio: None,
            warning: None,
            error: Some(error.into()),
            conversation_history: Vec::new(),
        }
    }
}

/// Sequences user turn → text generation → speech synthesis for one session.
///
/// Per-session serialization is enforced here: the store's exchange mutex is
/// held for the whole cycle, so a second message on the same session queues
/// behind the first and turn sequences never interleave.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    text: Arc<dyn TextProvider>,
    speech: Arc<dyn SpeechProvider>,
    script: Arc<NarrativeScript>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        text: Arc<dyn TextProvider>,
        speech: Arc<dyn SpeechProvider>,
        script: Arc<NarrativeScript>,
    ) -> Self {
        Self {
            store,
            text,
            speech,
            script,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn script(&self) -> &Arc<NarrativeScript> {
        &self.script
    }

    /// Run one full exchange cycle for `session_id`.
    ///
    /// Failure policy: a text-generation failure aborts the exchange and
    /// leaves the session with the user turn already appended, never a
    /// fabricated assistant turn. A synthesis failure degrades to a text-only
    /// success with a `warning`, since the assistant turn is already durably
    /// part of the history.
    pub async fn run_exchange(
        &self,
        session_id: &str,
        user_message: &str,
        reset: bool,
    ) -> Result<ExchangeResult> {
        let lock = self.store.exchange_lock(session_id);
        let _guard = lock.lock().await;

        if reset {
            self.store.reset(session_id);
        } else {
            self.store.get_or_create(session_id);
        }
        self.store.append(session_id, Turn::user(user_message))?;

        let history = self.store.history(session_id)?;
        let (system_prompt, messages) = split_system(&history);

        let reply = match self.text.generate(system_prompt, messages).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(session_id, error = %e, "text generation failed");
                return Err(ExchangeError::UpstreamText(e.to_string()).into());
            }
        };

        // The session may have been evicted while the call was in flight;
        // append re-validates and fails with UnknownSession in that case.
        self.store.append(session_id, Turn::assistant(&reply))?;

        let (audio, warning) = match self.speech.synthesize(&reply).await {
            Ok(bytes) => (Some(BASE64.encode(bytes)), None),
            Err(e) => {
                let err = ExchangeError::UpstreamSpeech(e.to_string());
                tracing::warn!(session_id, error = %err, "degrading to text-only reply");
                (None, Some(err.to_string()))
            }
        };

        let conversation_history = self.store.history(session_id)?;
        Ok(ExchangeResult {
            success: true,
            message: reply,
            audio,
            warning,
            error: None,
            conversation_history,
        })
    }

    /// Narrative variant: the user message is the configured stage prompt.
    /// Stage 0 always restarts the narrative with a fresh history.
    pub async fn run_stage(
        &self,
        session_id: &str,
        stage: usize,
        reset: bool,
    ) -> Result<ExchangeResult> {
        let descriptor = self.script.stage(stage)?;
        let prompt = descriptor.prompt.clone();
        let result = self
            .run_exchange(session_id, &prompt, reset || stage == 0)
            .await?;
        self.store.set_stage_cursor(session_id, stage + 1)?;
        Ok(result)
    }
}

/// Split a history into its instruction channel and message payload: the
/// leading system turn travels separately, everything after stays in order.
fn split_system(history: &[Turn]) -> (&str, &[Turn]) {
    match history.split_first() {
        Some((first, rest)) if first.role == TurnRole::System => (first.content.as_str(), rest),
        _ => ("", history),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GizmoError;
    use crate::speech::VoiceInfo;
    use tokio_test::{assert_err, assert_ok};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct EchoText {
        delay: Duration,
        calls: Mutex<Vec<Vec<Turn>>>,
    }

    impl EchoText {
        fn new() -> Self {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextProvider for EchoText {
        async fn generate(&self, _system: &str, history: &[Turn]) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(history.to_vec());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let last = history.last().map(|t| t.content.as_str()).unwrap_or("");
            Ok(format!("echo:{last}"))
        }
    }

    struct FailingText;

    #[async_trait]
    impl TextProvider for FailingText {
        async fn generate(&self, _system: &str, _history: &[Turn]) -> anyhow::Result<String> {
            anyhow::bail!("upstream 529")
        }
    }

    struct FixedSpeech {
        fail: bool,
    }

    #[async_trait]
    impl SpeechProvider for FixedSpeech {
        async fn synthesize(&self, _text: &str) -> anyhow::Result<Vec<u8>> {
            if self.fail {
                anyhow::bail!("synthesis unavailable")
            }
            Ok(vec![1, 2, 3, 4])
        }

        async fn list_voices(&self) -> anyhow::Result<Vec<VoiceInfo>> {
            Ok(Vec::new())
        }

        fn voice_id(&self) -> &str {
            "test-voice"
        }
    }

    fn orchestrator(
        text: Arc<dyn TextProvider>,
        speech_fails: bool,
    ) -> (Orchestrator, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new("system prompt"));
        let orch = Orchestrator::new(
            Arc::clone(&store),
            text,
            Arc::new(FixedSpeech { fail: speech_fails }),
            Arc::new(NarrativeScript::builtin()),
        );
        (orch, store)
    }

    #[tokio::test]
    async fn happy_path_appends_three_turns() {
        let (orch, store) = orchestrator(Arc::new(EchoText::new()), false);
        let result = tokio_test::assert_ok!(orch.run_exchange("s1", "hello", false).await);

        assert!(result.success);
        assert_eq!(result.message, "echo:hello");
        assert!(result.audio.as_deref().is_some_and(|a| !a.is_empty()));
        assert!(result.warning.is_none());
        assert_eq!(result.conversation_history.len(), 3);
        let roles: Vec<_> = result
            .conversation_history
            .iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(
            roles,
            [TurnRole::System, TurnRole::User, TurnRole::Assistant]
        );
        assert_eq!(store.history("s1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn system_turn_travels_outside_messages() {
        let provider = Arc::new(EchoText::new());
        let (orch, _) = orchestrator(provider.clone(), false);
        orch.run_exchange("s1", "hello", false).await.unwrap();

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().all(|t| t.role != TurnRole::System));
    }

    #[tokio::test]
    async fn text_failure_preserves_user_turn_only() {
        let (orch, store) = orchestrator(Arc::new(FailingText), false);
        let err = orch.run_exchange("s1", "hello", false).await.unwrap_err();
        assert!(matches!(
            err,
            GizmoError::Exchange(ExchangeError::UpstreamText(_))
        ));

        let history = store.history("s1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, TurnRole::System);
        assert_eq!(history[1].role, TurnRole::User);
    }

    #[tokio::test]
    async fn speech_failure_degrades_to_text_only() {
        let (orch, store) = orchestrator(Arc::new(EchoText::new()), true);
        let result = orch.run_exchange("s1", "hello", false).await.unwrap();

        assert!(result.success);
        assert!(result.audio.is_none());
        assert!(
            result
                .warning
                .as_deref()
                .is_some_and(|w| w.contains("speech synthesis failed"))
        );
        // The assistant turn is still durably part of the history.
        assert_eq!(store.history("s1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reset_replaces_history() {
        let (orch, _) = orchestrator(Arc::new(EchoText::new()), false);
        orch.run_exchange("s1", "one", false).await.unwrap();
        orch.run_exchange("s1", "two", false).await.unwrap();
        let result = orch.run_exchange("s1", "three", true).await.unwrap();
        assert_eq!(result.conversation_history.len(), 3);
    }

    #[tokio::test]
    async fn multi_turn_history_grows_in_order() {
        let (orch, store) = orchestrator(Arc::new(EchoText::new()), false);
        orch.run_exchange("s1", "one", false).await.unwrap();
        orch.run_exchange("s1", "two", false).await.unwrap();

        let contents: Vec<_> = store
            .history("s1")
            .unwrap()
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(
            contents,
            ["system prompt", "one", "echo:one", "two", "echo:two"]
        );
    }

    #[tokio::test]
    async fn rapid_messages_serialize_in_submission_order() {
        let (orch, store) = orchestrator(
            Arc::new(EchoText::with_delay(Duration::from_millis(50))),
            false,
        );
        let orch = Arc::new(orch);

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run_exchange("s1", "first", false).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run_exchange("s1", "second", false).await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let contents: Vec<_> = store
            .history("s1")
            .unwrap()
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(
            contents,
            [
                "system prompt",
                "first",
                "echo:first",
                "second",
                "echo:second"
            ]
        );
    }

    #[tokio::test]
    async fn stage_zero_twice_resets_history() {
        let (orch, _) = orchestrator(Arc::new(EchoText::new()), false);
        let first = orch.run_stage("s1", 0, true).await.unwrap();
        assert_eq!(first.conversation_history.len(), 3);
        // Second stage-0 request starts fresh even without an explicit reset.
        let second = orch.run_stage("s1", 0, false).await.unwrap();
        assert_eq!(second.conversation_history.len(), 3);
    }

    #[tokio::test]
    async fn stage_advances_cursor() {
        let (orch, store) = orchestrator(Arc::new(EchoText::new()), false);
        orch.run_stage("s1", 0, true).await.unwrap();
        assert_eq!(store.stage_cursor("s1").unwrap(), 1);
        orch.run_stage("s1", 1, false).await.unwrap();
        assert_eq!(store.stage_cursor("s1").unwrap(), 2);
    }

    #[tokio::test]
    async fn out_of_range_stage_fails_without_touching_session() {
        let (orch, store) = orchestrator(Arc::new(EchoText::new()), false);
        let err = tokio_test::assert_err!(orch.run_stage("s1", 99, false).await);
        assert!(matches!(err, GizmoError::Narrative(_)));
        assert!(!store.contains("s1"));
    }

    #[test]
    fn result_serializes_protocol_field_names() {
        let result = ExchangeResult {
            success: true,
            message: "hi".into(),
            audio: Some("QUJD".into()),
            warning: None,
            error: None,
            conversation_history: vec![Turn::system("s"), Turn::user("u"), Turn::assistant("hi")],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["conversationHistory"].as_array().unwrap().len(), 3);
        assert!(json.get("warning").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_serializes_error_only() {
        let json = serde_json::to_value(ExchangeResult::failure("boom")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("message").is_none());
        assert!(json.get("conversationHistory").is_none());
    }

    #[test]
    fn split_system_handles_missing_system_turn() {
        let history = [Turn::user("u")];
        let (system, rest) = split_system(&history);
        assert_eq!(system, "");
        assert_eq!(rest.len(), 1);
    }
}
