//! Message router
//!
//! Bridges user-entered text and the network-visible chat stream. Outgoing
//! lines are appended to the local log exactly once each; incoming entries
//! from every active peer session are tagged with that peer's display name,
//! resolved from the registry at render time, and handed to the display sink.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::Result;
use crate::log::ReplicatedLog;
use crate::registry::PeerRegistry;
use crate::types::PeerIdentity;

// ----------------------------------------------------------------------------
// Chat Events
// ----------------------------------------------------------------------------

/// What the display sink receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// One chat line from a peer, rendered as `"<sender>: <text>"`
    Message { sender: String, text: String },
    /// Operational notice for the user
    System(String),
}

pub type ChatEventSender = mpsc::UnboundedSender<ChatEvent>;
pub type ChatEvents = mpsc::UnboundedReceiver<ChatEvent>;

/// Entries flowing from session live tails into the router
pub type IncomingSender = mpsc::UnboundedSender<(PeerIdentity, String)>;
pub type IncomingReceiver = mpsc::UnboundedReceiver<(PeerIdentity, String)>;

// ----------------------------------------------------------------------------
// Message Router
// ----------------------------------------------------------------------------

/// Dispatches outgoing text to the local log and incoming tail entries to
/// the display sink
pub struct MessageRouter {
    local_log: Arc<dyn ReplicatedLog>,
    incoming: IncomingSender,
}

impl MessageRouter {
    /// Create the router and spawn its incoming-dispatch task. The task ends
    /// when every session's incoming sender is gone or the sink is dropped.
    pub fn spawn(
        local_log: Arc<dyn ReplicatedLog>,
        registry: Arc<PeerRegistry>,
        events: ChatEventSender,
    ) -> (Self, JoinHandle<()>) {
        let (incoming, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch_incoming(rx, registry, events));
        (
            Self {
                local_log,
                incoming,
            },
            task,
        )
    }

    /// Append one line of local input to the local log. Whitespace-only
    /// input is a no-op; repeated identical lines are legitimate separate
    /// entries. Returns the assigned sequence number, if appended.
    pub async fn send(&self, line: &str) -> Result<Option<u64>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let seq = self.local_log.append(trimmed).await?;
        Ok(Some(seq))
    }

    /// Sender handed to each peer session's live-tail task
    pub fn incoming_sender(&self) -> IncomingSender {
        self.incoming.clone()
    }
}

/// Forward tail entries to the sink, resolving display names per entry so a
/// late name update is reflected
async fn dispatch_incoming(
    mut rx: IncomingReceiver,
    registry: Arc<PeerRegistry>,
    events: ChatEventSender,
) {
    while let Some((identity, text)) = rx.recv().await {
        let sender = registry
            .display_name(&identity)
            .await
            .unwrap_or_else(|| identity.short());
        if events
            .send(ChatEvent::Message { sender, text })
            .is_err()
        {
            break;
        }
    }
    debug!("incoming dispatch ended");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
