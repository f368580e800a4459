//! Core identifier types for swarmchat
//!
//! Newtype wrappers around the 32-byte identifiers that flow through the
//! system: transport peer keys, replicated-log public identifiers, and
//! rendezvous topics.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ChatError;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Opaque, connection-derived identifier for a remote peer.
///
/// Derived from the remote party's transport public key; stable for the
/// lifetime of one connection and unique per concurrently-connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerIdentity([u8; 32]);

impl PeerIdentity {
    /// Create a new identity from 32 bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create an identity from the first 32 bytes of a longer key,
    /// zero-padding shorter input
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; 32];
        let len = core::cmp::min(bytes.len(), 32);
        id[..len].copy_from_slice(&bytes[..len]);
        Self(id)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Truncated, anonymized form used as the display name before the
    /// handshake supplies a real one, e.g. `a1b2c3...`
    pub fn short(&self) -> String {
        format!("{}...", &hex::encode(self.0)[..6])
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PeerIdentity {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|_| ChatError::invalid_identifier("invalid hex in peer identity"))?;
        if bytes.len() != 32 {
            return Err(ChatError::invalid_identifier(
                "peer identity must be exactly 32 bytes",
            ));
        }
        Ok(Self::from_bytes(&bytes))
    }
}

impl Deref for PeerIdentity {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Log Identifier
// ----------------------------------------------------------------------------

/// Stable public identifier of a replicated log.
///
/// Hex-encoded on the wire; a remote copy of a log can be opened read-only
/// from this identifier alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogId([u8; 32]);

// On the wire a log id is always its hex encoding
impl Serialize for LogId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for LogId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl LogId {
    /// Create a new log identifier from 32 bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random log identifier
    pub fn random() -> crate::errors::Result<Self> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| ChatError::invalid_identifier(format!("rng failure: {e}")))?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding used in the handshake message
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Truncated form for status lines, e.g. `a1b2c3...`
    pub fn short(&self) -> String {
        format!("{}...", &hex::encode(self.0)[..6])
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for LogId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|_| ChatError::invalid_identifier("invalid hex in log id"))?;
        if bytes.len() != 32 {
            return Err(ChatError::invalid_identifier(
                "log id must be exactly 32 bytes",
            ));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }
}

// ----------------------------------------------------------------------------
// Topic Identifier
// ----------------------------------------------------------------------------

/// Fixed-size rendezvous topic grouping participants for discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId([u8; 32]);

impl TopicId {
    /// Create a new topic identifier from 32 bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
