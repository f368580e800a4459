//! Replicated log collaborator interface
//!
//! The coordinator never assumes a concrete log implementation; it talks to
//! these traits. A log is an append-only, identifier-addressed sequence of
//! text entries. A remote copy can be opened read-only from its identifier
//! and kept in sync over an existing connection; a live tail yields each
//! newly appended entry as replication delivers it.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::types::LogId;
use crate::wire::SyncFrame;

/// Outbound half of a connection's replication channel. Frames pushed here
/// are serialized onto the connection by its writer task.
pub type FrameSender = mpsc::UnboundedSender<SyncFrame>;

// ----------------------------------------------------------------------------
// Replicated Log
// ----------------------------------------------------------------------------

/// Handle to one replicated log, local (writable) or remote (read-only)
#[async_trait]
pub trait ReplicatedLog: Send + Sync {
    /// Stable public identifier of this log
    fn id(&self) -> LogId;

    /// Whether this handle may append
    fn writable(&self) -> bool;

    /// Append one entry, returning its sequence number.
    /// Fails with `LogError::NotWritable` on a read-only handle and
    /// `LogError::Closed` after close.
    async fn append(&self, entry: &str) -> Result<u64>;

    /// Subscribe to entries appended from now on. The returned sequence is
    /// lazy, infinite and non-restartable; it ends only when this handle is
    /// closed.
    async fn live_tail(&self) -> Result<LiveTail>;

    /// Start replicating this log's entries onto a connection. Existing
    /// entries are backfilled, each later append is pushed as it happens.
    /// Non-blocking; a read-only handle registers nothing.
    async fn replicate(&self, outbound: FrameSender) -> Result<()>;

    /// Apply one sync frame received from the connection this log is
    /// replicating over. Frames for a different log id and duplicates of
    /// already-applied sequence numbers are ignored.
    async fn ingest(&self, frame: SyncFrame) -> Result<()>;

    /// Close the handle, ending every live tail and dropping replication
    /// sinks. Idempotent.
    async fn close(&self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Log Store
// ----------------------------------------------------------------------------

/// Storage backend able to create local logs and attach remote ones
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create a fresh writable log with a new identifier
    async fn create(&self) -> Result<Arc<dyn ReplicatedLog>>;

    /// Open a read-only attachment to the log named by `id`
    async fn open(&self, id: LogId) -> Result<Arc<dyn ReplicatedLog>>;
}

// ----------------------------------------------------------------------------
// Live Tail
// ----------------------------------------------------------------------------

/// Live, tailing read interface over a replicated log.
///
/// Yields entries in the order the owning peer appended them. Terminates
/// when the underlying log handle is closed; it cannot be restarted.
pub struct LiveTail {
    rx: mpsc::UnboundedReceiver<String>,
}

impl LiveTail {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Wait for the next entry; `None` once the log is closed
    pub async fn next_entry(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for LiveTail {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
