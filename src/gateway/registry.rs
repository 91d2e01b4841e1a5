//! Active duplex connection set and heartbeat sweep.
//!
//! The heartbeat timer starts with the first registered connection and stops
//! when the set empties, so an idle server runs no background work. Last-pong
//! time is tracked per connection; a connection whose acknowledgement is older
//! than `missed_heartbeat_limit` intervals is force-closed and removed.

use super::events::PING;
use crate::error::TransportError;
use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

struct Peer {
    session_id: String,
    tx: mpsc::UnboundedSender<Message>,
    /// Wakes the connection task so the socket actually closes.
    shutdown: Arc<Notify>,
    last_pong: Instant,
}

struct RegistryInner {
    peers: HashMap<Uuid, Peer>,
    heartbeat: Option<JoinHandle<()>>,
}

pub struct ConnectionRegistry {
    heartbeat_interval: Duration,
    missed_limit: u32,
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(heartbeat_interval: Duration, missed_limit: u32) -> Self {
        Self {
            heartbeat_interval,
            missed_limit,
            inner: Mutex::new(RegistryInner {
                peers: HashMap::new(),
                heartbeat: None,
            }),
        }
    }

    /// Add a connection to the active set, starting the heartbeat timer if it
    /// was idle.
    pub fn register(
        self: &Arc<Self>,
        id: Uuid,
        session_id: impl Into<String>,
        tx: mpsc::UnboundedSender<Message>,
        shutdown: Arc<Notify>,
    ) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.peers.insert(
            id,
            Peer {
                session_id: session_id.into(),
                tx,
                shutdown,
                last_pong: Instant::now(),
            },
        );
        let idle = inner
            .heartbeat
            .as_ref()
            .is_none_or(tokio::task::JoinHandle::is_finished);
        if idle {
            inner.heartbeat = Some(self.spawn_heartbeat());
        }
    }

    /// Remove a connection; stops the heartbeat timer when the set empties.
    pub fn unregister(&self, id: Uuid) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.peers.remove(&id);
        if inner.peers.is_empty() {
            if let Some(handle) = inner.heartbeat.take() {
                handle.abort();
            }
        }
    }

    /// Record a heartbeat acknowledgement.
    pub fn pong(&self, id: Uuid) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(peer) = inner.peers.get_mut(&id) {
            peer.last_pong = Instant::now();
        }
    }

    /// Send a text frame to one connection. Sends to closed or unknown
    /// connections are no-ops.
    pub fn send_to(&self, id: Uuid, text: &str) {
        let inner = self.inner.lock().expect("registry poisoned");
        if let Some(peer) = inner.peers.get(&id) {
            if peer.tx.send(Message::Text(text.to_string().into())).is_err() {
                let err = TransportError::ClosedConnection(id.to_string());
                tracing::trace!(error = %err, "dropping outbound frame");
            }
        }
    }

    /// Send a text frame to every open connection, optionally excluding the
    /// originating one.
    pub fn broadcast(&self, text: &str, exclude: Option<Uuid>) {
        let inner = self.inner.lock().expect("registry poisoned");
        for (id, peer) in &inner.peers {
            if Some(*id) == exclude {
                continue;
            }
            let _ = peer.tx.send(Message::Text(text.to_string().into()));
        }
    }

    pub fn session_of(&self, id: Uuid) -> Option<String> {
        let inner = self.inner.lock().expect("registry poisoned");
        inner.peers.get(&id).map(|p| p.session_id.clone())
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("registry poisoned").peers.len()
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.heartbeat_interval);
            // The first tick completes immediately; probes start one
            // interval after the first connection.
            interval.tick().await;
            loop {
                interval.tick().await;
                if registry.sweep() == 0 {
                    break;
                }
            }
        })
    }

    /// One heartbeat pass: ping live connections, force-close stale ones.
    /// Returns the number of connections remaining.
    fn sweep(&self) -> usize {
        let deadline = self.heartbeat_interval * self.missed_limit;
        let mut inner = self.inner.lock().expect("registry poisoned");
        inner.peers.retain(|id, peer| {
            if peer.last_pong.elapsed() > deadline {
                tracing::info!(
                    connection_id = %id,
                    session_id = %peer.session_id,
                    "closing unresponsive connection"
                );
                let _ = peer.tx.send(Message::Close(None));
                peer.shutdown.notify_one();
                false
            } else {
                let _ = peer.tx.send(Message::Text(PING.into()));
                true
            }
        });
        inner.peers.len()
    }
}
