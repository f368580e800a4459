//! Peer registry
//!
//! The single source of truth for "who am I currently connected to". The
//! registry is the only structure touched by more than one logical flow
//! (connection events and shutdown), so every mutation goes through one
//! mutex-guarded map: operations on different identities never interfere,
//! operations on the same identity are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::ChatError;
use crate::session::PeerSession;
use crate::types::PeerIdentity;

// ----------------------------------------------------------------------------
// Session Entry
// ----------------------------------------------------------------------------

/// A registered session plus the task driving it
pub struct SessionEntry {
    session: Arc<Mutex<PeerSession>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionEntry {
    pub fn new(session: PeerSession) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::new(Mutex::new(session)),
            task: std::sync::Mutex::new(None),
        })
    }

    pub fn session(&self) -> &Arc<Mutex<PeerSession>> {
        &self.session
    }

    /// Attach the driving task handle once spawned
    pub fn set_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Release everything this session owns: terminal state, remote log
    /// closed, driving task aborted. Failures are logged, never escalated;
    /// used by shutdown and by duplicate-connection displacement.
    pub async fn teardown(&self) {
        let (identity, remote_log) = {
            let mut session = self.session.lock().await;
            (session.identity(), session.close())
        };
        if let Some(log) = remote_log {
            if let Err(e) = log.close().await {
                let err = ChatError::shutdown("remote log", e.to_string());
                warn!(peer = %identity.short(), error = %err, "teardown step failed");
            }
        }
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            handle.abort();
        }
        debug!(peer = %identity.short(), "session torn down");
    }
}

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

/// Concurrent collection of active peer sessions, keyed by identity
#[derive(Default)]
pub struct PeerRegistry {
    inner: Mutex<HashMap<PeerIdentity, Arc<SessionEntry>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. Returns the displaced entry if the identity was
    /// already present; callers must tear the old one down, since a duplicate
    /// connection never silently replaces a live session.
    pub async fn register(
        &self,
        identity: PeerIdentity,
        entry: Arc<SessionEntry>,
    ) -> Option<Arc<SessionEntry>> {
        self.inner.lock().await.insert(identity, entry)
    }

    /// Look up the session for an identity
    pub async fn lookup(&self, identity: &PeerIdentity) -> Option<Arc<SessionEntry>> {
        self.inner.lock().await.get(identity).cloned()
    }

    /// Resolve the current display name for an identity, if registered
    pub async fn display_name(&self, identity: &PeerIdentity) -> Option<String> {
        let entry = self.lookup(identity).await?;
        let session = entry.session.lock().await;
        Some(session.display_name().to_string())
    }

    /// Remove and return the session for an identity
    pub async fn remove(&self, identity: &PeerIdentity) -> Option<Arc<SessionEntry>> {
        self.inner.lock().await.remove(identity)
    }

    /// Remove the identity only if the map still holds exactly this entry.
    /// A session tearing itself down must not evict the replacement a
    /// duplicate connection may have registered meanwhile.
    pub async fn remove_if(&self, identity: &PeerIdentity, entry: &Arc<SessionEntry>) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.get(identity) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                inner.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Remove and return every session; used only by global shutdown
    pub async fn drain(&self) -> Vec<(PeerIdentity, Arc<SessionEntry>)> {
        self.inner.lock().await.drain().collect()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
