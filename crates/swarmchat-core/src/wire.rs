//! Wire format for the per-connection chat protocol
//!
//! Every frame is one JSON object per line on the raw connection. The
//! handshake frame is always the first thing either side writes, before any
//! replication traffic, which is how receivers distinguish the two without a
//! length-prefixed framing layer.

use serde::{Deserialize, Serialize};

use crate::errors::{HandshakeError, Result};
use crate::types::LogId;

// ----------------------------------------------------------------------------
// Frames
// ----------------------------------------------------------------------------

/// A single line on the connection, tagged by its `type` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireFrame {
    /// One-time identity bootstrap, exactly one per direction per connection
    #[serde(rename = "log-id")]
    Handshake(HandshakeMessage),
    /// Replicated-log entry sync, only ever sent after the handshake
    #[serde(rename = "sync")]
    Sync(SyncFrame),
}

/// Handshake payload: the sender's log identifier and chosen display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub log_id: LogId,
    pub username: String,
}

/// One replicated log entry, addressed by log id and append sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFrame {
    pub log_id: LogId,
    pub seq: u64,
    pub entry: String,
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

impl WireFrame {
    /// Serialize to a single newline-terminated JSON line
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).map_err(HandshakeError::Malformed)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one line. Callers discard malformed lines silently; a bad frame
    /// never tears a connection down.
    pub fn decode(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

impl HandshakeMessage {
    pub fn new(log_id: LogId, username: impl Into<String>) -> Self {
        Self {
            log_id,
            username: username.into(),
        }
    }

    /// A handshake with an empty display name is treated as malformed
    pub fn validate(&self) -> std::result::Result<(), HandshakeError> {
        if self.username.trim().is_empty() {
            return Err(HandshakeError::EmptyDisplayName);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_round_trip() {
        let frame = WireFrame::Handshake(HandshakeMessage::new(LogId::new([3; 32]), "alice"));
        let line = frame.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(WireFrame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn test_handshake_wire_shape() {
        let frame = WireFrame::Handshake(HandshakeMessage::new(LogId::new([0xaa; 32]), "bob"));
        let line = frame.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "log-id");
        assert_eq!(value["log_id"], hex::encode([0xaa; 32]));
        assert_eq!(value["username"], "bob");
    }

    #[test]
    fn test_sync_frame_round_trip() {
        let frame = WireFrame::Sync(SyncFrame {
            log_id: LogId::new([1; 32]),
            seq: 7,
            entry: "hello world".to_string(),
        });
        let line = frame.encode().unwrap();
        assert_eq!(WireFrame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(WireFrame::decode("not json at all").is_err());
        assert!(WireFrame::decode("{\"type\":\"unknown\"}").is_err());
        assert!(WireFrame::decode("{\"type\":\"log-id\"}").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_log_id() {
        let line = "{\"type\":\"log-id\",\"log_id\":\"zzzz\",\"username\":\"x\"}";
        assert!(WireFrame::decode(line).is_err());
    }

    #[test]
    fn test_validate_empty_username() {
        let msg = HandshakeMessage::new(LogId::new([0; 32]), "   ");
        assert!(msg.validate().is_err());
        let msg = HandshakeMessage::new(LogId::new([0; 32]), "carol");
        assert!(msg.validate().is_ok());
    }
}
