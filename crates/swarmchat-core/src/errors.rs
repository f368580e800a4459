//! Error types for swarmchat
//!
//! All errors surfaced by the core library. Per-peer failures are contained
//! to that peer's session; only startup-phase failures are fatal to the
//! process, and shutdown-phase failures are logged but never escalated.

use crate::types::PeerIdentity;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Handshake payload problems. Always recovered locally by discarding the
/// offending message; never tears a connection down.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("malformed handshake payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("empty display name in handshake")]
    EmptyDisplayName,
}

/// Replicated-log operation errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log is closed")]
    Closed,
    #[error("log {log_id} is not writable")]
    NotWritable { log_id: String },
    #[error("out-of-order sync frame: expected seq {expected}, got {actual}")]
    OutOfOrder { expected: u64, actual: u64 },
}

/// Session state machine errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session transition for peer {peer}: {from} -> {to}")]
    InvalidTransition {
        peer: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("remote log already attached for peer {peer}")]
    AlreadyAttached { peer: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for swarmchat
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("failed to open remote log: {reason}")]
    LogOpen { reason: String },

    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("invalid identifier: {reason}")]
    InvalidIdentifier { reason: String },

    #[error("failed to release {resource} during shutdown: {reason}")]
    Shutdown { resource: String, reason: String },

    #[error("swarm transport error: {reason}")]
    Swarm { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ChatError {
    /// Create a remote log open failure
    pub fn log_open<R: Into<String>>(reason: R) -> Self {
        ChatError::LogOpen {
            reason: reason.into(),
        }
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier<R: Into<String>>(reason: R) -> Self {
        ChatError::InvalidIdentifier {
            reason: reason.into(),
        }
    }

    /// Create a shutdown resource-release error
    pub fn shutdown<S: Into<String>, R: Into<String>>(resource: S, reason: R) -> Self {
        ChatError::Shutdown {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a swarm transport error
    pub fn swarm<R: Into<String>>(reason: R) -> Self {
        ChatError::Swarm {
            reason: reason.into(),
        }
    }

    /// Create an invalid state transition error
    pub fn invalid_transition(peer: PeerIdentity, from: &'static str, to: &'static str) -> Self {
        ChatError::Session(SessionError::InvalidTransition {
            peer: peer.short(),
            from,
            to,
        })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = std::result::Result<T, ChatError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_error_names_the_resource() {
        let err = ChatError::shutdown("remote log", "log is closed");
        assert_eq!(
            err.to_string(),
            "failed to release remote log during shutdown: log is closed"
        );
    }

    #[test]
    fn test_invalid_transition_names_peer_and_states() {
        let err = ChatError::invalid_transition(
            PeerIdentity::new([0xab; 32]),
            "Connected",
            "Active",
        );
        assert_eq!(
            err.to_string(),
            "session error: invalid session transition for peer ababab...: Connected -> Active"
        );
    }
}
