use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Speaker role of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// One message in a conversation, tagged with its speaker role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

struct SessionEntry {
    turns: Vec<Turn>,
    created_at: DateTime<Utc>,
    stage_cursor: usize,
    /// Monotonic creation stamp; deferred eviction only fires if the entry it
    /// captured is still the live one.
    generation: u64,
    /// Serializes exchanges per session: at most one in flight at a time.
    exchange_lock: Arc<AsyncMutex<()>>,
}

/// Process-wide conversation state keyed by opaque session id.
///
/// Constructed once at startup and injected into the orchestrator and both
/// transport adapters; there is no module-level singleton. Turn sequences are
/// replaced on reset, never mutated in place, so in-flight reads keep a
/// consistent snapshot.
pub struct SessionStore {
    system_prompt: String,
    next_generation: AtomicU64,
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            next_generation: AtomicU64::new(0),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn fresh_entry(&self) -> SessionEntry {
        SessionEntry {
            turns: vec![Turn::system(&self.system_prompt)],
            created_at: Utc::now(),
            stage_cursor: 0,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            exchange_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Create the session if absent, seeded with the configured system turn.
    /// Idempotent for existing sessions.
    pub fn get_or_create(&self, id: &str) {
        let mut inner = self.inner.lock().expect("session store poisoned");
        if !inner.contains_key(id) {
            inner.insert(id.to_string(), self.fresh_entry());
        }
    }

    /// Replace the turn sequence with a fresh system-seeded one. Creates the
    /// session if absent.
    pub fn reset(&self, id: &str) {
        let mut inner = self.inner.lock().expect("session store poisoned");
        match inner.get_mut(id) {
            Some(entry) => {
                entry.turns = vec![Turn::system(&self.system_prompt)];
                entry.stage_cursor = 0;
            }
            None => {
                inner.insert(id.to_string(), self.fresh_entry());
            }
        }
    }

    /// Seed a session from a client-supplied history snapshot. A leading
    /// system turn is preserved; otherwise the configured one is prepended.
    pub fn seed(&self, id: &str, snapshot: Vec<Turn>) {
        let mut entry = self.fresh_entry();
        match snapshot.first() {
            Some(first) if first.role == TurnRole::System => entry.turns = snapshot,
            Some(_) => entry.turns.extend(snapshot),
            None => {}
        }
        let mut inner = self.inner.lock().expect("session store poisoned");
        inner.insert(id.to_string(), entry);
    }

    /// Append a turn, failing if the session was evicted concurrently.
    pub fn append(&self, id: &str, turn: Turn) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        entry.turns.push(turn);
        Ok(())
    }

    /// Snapshot of the session's turn sequence in chronological order.
    pub fn history(&self, id: &str) -> Result<Vec<Turn>, SessionError> {
        let inner = self.inner.lock().expect("session store poisoned");
        inner
            .get(id)
            .map(|entry| entry.turns.clone())
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    /// Remove the session. No-op for an already-absent id.
    pub fn evict(&self, id: &str) {
        let mut inner = self.inner.lock().expect("session store poisoned");
        inner.remove(id);
    }

    /// Evict after a grace period. The eviction is skipped if the session was
    /// removed and re-created in the meantime.
    pub fn schedule_evict(self: &Arc<Self>, id: &str, grace: Duration) {
        let generation = {
            let inner = self.inner.lock().expect("session store poisoned");
            match inner.get(id) {
                Some(entry) => entry.generation,
                None => return,
            }
        };
        let store = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut inner = store.inner.lock().expect("session store poisoned");
            if inner.get(&id).is_some_and(|entry| entry.generation == generation) {
                inner.remove(&id);
                tracing::debug!(session_id = %id, "evicted session after grace period");
            }
        });
    }

    /// Per-session exchange mutex; creates the session if absent so a lock
    /// always exists before the first exchange runs.
    pub fn exchange_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let entry = inner
            .entry(id.to_string())
            .or_insert_with(|| self.fresh_entry());
        Arc::clone(&entry.exchange_lock)
    }

    pub fn set_stage_cursor(&self, id: &str, cursor: usize) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        entry.stage_cursor = cursor;
        Ok(())
    }

    pub fn stage_cursor(&self, id: &str) -> Result<usize, SessionError> {
        let inner = self.inner.lock().expect("session store poisoned");
        inner
            .get(id)
            .map(|entry| entry.stage_cursor)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    pub fn created_at(&self, id: &str) -> Result<DateTime<Utc>, SessionError> {
        let inner = self.inner.lock().expect("session store poisoned");
        inner
            .get(id)
            .map(|entry| entry.created_at)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("session store poisoned")
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new("You are a test machine."))
    }

    #[test]
    fn get_or_create_seeds_system_turn() {
        let store = store();
        store.get_or_create("s1");
        let history = store.history("s1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, TurnRole::System);
        assert_eq!(history[0].content, "You are a test machine.");
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = store();
        store.get_or_create("s1");
        store.append("s1", Turn::user("hello")).unwrap();
        store.get_or_create("s1");
        assert_eq!(store.history("s1").unwrap().len(), 2);
    }

    #[test]
    fn first_turn_is_always_system_after_appends() {
        let store = store();
        store.get_or_create("s1");
        store.append("s1", Turn::user("one")).unwrap();
        store.append("s1", Turn::assistant("two")).unwrap();
        store.append("s1", Turn::user("three")).unwrap();
        let history = store.history("s1").unwrap();
        assert_eq!(history[0].role, TurnRole::System);
        let contents: Vec<_> = history[1..].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[test]
    fn reset_yields_exactly_one_system_turn() {
        let store = store();
        store.get_or_create("s1");
        store.append("s1", Turn::user("hello")).unwrap();
        store.append("s1", Turn::assistant("hi")).unwrap();
        store.reset("s1");
        let history = store.history("s1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, TurnRole::System);
    }

    #[test]
    fn reset_creates_absent_session() {
        let store = store();
        store.reset("ghost");
        assert!(store.contains("ghost"));
    }

    #[test]
    fn reset_does_not_alias_inflight_snapshot() {
        let store = store();
        store.get_or_create("s1");
        store.append("s1", Turn::user("before")).unwrap();
        let snapshot = store.history("s1").unwrap();
        store.reset("s1");
        // The snapshot taken before reset is untouched.
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.history("s1").unwrap().len(), 1);
    }

    #[test]
    fn append_after_evict_is_unknown_session() {
        let store = store();
        store.get_or_create("s1");
        store.evict("s1");
        let err = store.append("s1", Turn::user("late")).unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[test]
    fn evict_absent_is_noop() {
        let store = store();
        store.evict("never-existed");
        assert!(store.is_empty());
    }

    #[test]
    fn seed_preserves_leading_system_turn() {
        let store = store();
        store.seed(
            "s1",
            vec![Turn::system("custom system"), Turn::user("hi")],
        );
        let history = store.history("s1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "custom system");
    }

    #[test]
    fn seed_prepends_system_when_snapshot_lacks_one() {
        let store = store();
        store.seed("s1", vec![Turn::user("hi"), Turn::assistant("hello")]);
        let history = store.history("s1").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, TurnRole::System);
        assert_eq!(history[1].content, "hi");
    }

    #[test]
    fn seed_empty_snapshot_behaves_like_fresh_session() {
        let store = store();
        store.seed("s1", vec![]);
        let history = store.history("s1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, TurnRole::System);
    }

    #[test]
    fn stage_cursor_roundtrip() {
        let store = store();
        store.get_or_create("s1");
        assert_eq!(store.stage_cursor("s1").unwrap(), 0);
        store.set_stage_cursor("s1", 3).unwrap();
        assert_eq!(store.stage_cursor("s1").unwrap(), 3);
        store.reset("s1");
        assert_eq!(store.stage_cursor("s1").unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_eviction_fires_after_grace() {
        let store = store();
        store.get_or_create("http-1");
        store.schedule_evict("http-1", Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!store.contains("http-1"));
        assert!(matches!(
            store.append("http-1", Turn::user("late")),
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_eviction_spares_recreated_session() {
        let store = store();
        store.get_or_create("s1");
        store.schedule_evict("s1", Duration::from_secs(60));
        // Session is torn down and re-created before the timer fires.
        store.evict("s1");
        store.get_or_create("s1");
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.contains("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_evict_on_absent_session_is_noop() {
        let store = store();
        store.schedule_evict("ghost", Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.is_empty());
    }

    #[test]
    fn turn_serializes_with_lowercase_roles() {
        let json = serde_json::to_value(Turn::assistant("hello")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hello");
        let back: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(back.role, TurnRole::Assistant);
    }
}
