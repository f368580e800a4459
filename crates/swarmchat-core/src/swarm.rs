//! Swarm transport collaborator interface
//!
//! Discovery and connection establishment live behind this trait. Given a
//! rendezvous topic, an implementation finds other participants advertising
//! the same topic and hands back one duplex byte stream per discovered peer,
//! reporting connects, closures and errors as [`SwarmEvent`]s on an mpsc
//! channel the implementation exposes at construction time.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::errors::{ChatError, Result};
use crate::types::{PeerIdentity, TopicId};

// ----------------------------------------------------------------------------
// Connections
// ----------------------------------------------------------------------------

/// A raw duplex byte stream to one peer
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// Owned connection handle; exactly one peer session ever holds it
pub type Connection = Box<dyn Duplex>;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Notifications from the swarm transport to the coordinator
pub enum SwarmEvent {
    /// A new peer connection was established
    Connection {
        identity: PeerIdentity,
        stream: Connection,
    },
    /// The transport observed a connection close
    ConnectionClosed { identity: PeerIdentity },
    /// The transport observed a connection-level failure
    ConnectionError {
        identity: PeerIdentity,
        error: ChatError,
    },
}

impl std::fmt::Debug for SwarmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwarmEvent::Connection { identity, .. } => f
                .debug_struct("Connection")
                .field("identity", &identity.short())
                .finish(),
            SwarmEvent::ConnectionClosed { identity } => f
                .debug_struct("ConnectionClosed")
                .field("identity", &identity.short())
                .finish(),
            SwarmEvent::ConnectionError { identity, error } => f
                .debug_struct("ConnectionError")
                .field("identity", &identity.short())
                .field("error", error)
                .finish(),
        }
    }
}

/// Receiving end of a transport's event stream
pub type SwarmEvents = mpsc::UnboundedReceiver<SwarmEvent>;

/// Sending end, held by transport implementations
pub type SwarmEventSender = mpsc::UnboundedSender<SwarmEvent>;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// How to participate in a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Advertise ourselves so others can find us
    pub announce: bool,
    /// Actively look for other participants
    pub lookup: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            announce: true,
            lookup: true,
        }
    }
}

/// Topic-based peer discovery and connection delivery
#[async_trait]
pub trait SwarmTransport: Send + Sync {
    /// Start participating in `topic`
    async fn join(&self, topic: TopicId, options: JoinOptions) -> Result<()>;

    /// Stop participating in `topic`; no further connections are delivered
    async fn leave(&self, topic: TopicId) -> Result<()>;

    /// Release all transport resources
    async fn shutdown(&self) -> Result<()>;
}
