//! In-memory replicated log
//!
//! RAM-backed reference implementation of [`ReplicatedLog`] / [`LogStore`].
//! Logs are ephemeral per run: nothing persists across restarts. A writable
//! log pushes every append to its registered replication sinks (with a full
//! backfill when a sink registers); a read-only attachment fills up from the
//! sync frames its session ingests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::errors::{LogError, Result};
use crate::log::{FrameSender, LiveTail, LogStore, ReplicatedLog};
use crate::types::LogId;
use crate::wire::SyncFrame;

// ----------------------------------------------------------------------------
// Memory Log
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    entries: Vec<String>,
    tails: Vec<mpsc::UnboundedSender<String>>,
    sinks: Vec<FrameSender>,
    closed: bool,
}

/// An append-only log held entirely in memory
pub struct MemoryLog {
    id: LogId,
    writable: bool,
    inner: Mutex<Inner>,
}

impl MemoryLog {
    /// Create a fresh writable log with a random identifier
    pub fn create() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            id: LogId::random()?,
            writable: true,
            inner: Mutex::new(Inner::default()),
        }))
    }

    /// Open a read-only attachment to a remote log. Starts empty; entries
    /// arrive through [`ReplicatedLog::ingest`].
    pub fn attach(id: LogId) -> Arc<Self> {
        Arc::new(Self {
            id,
            writable: false,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Number of entries currently held
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn notify_tails(inner: &mut Inner, entry: &str) {
        inner.tails.retain(|tx| tx.send(entry.to_string()).is_ok());
    }
}

#[async_trait]
impl ReplicatedLog for MemoryLog {
    fn id(&self) -> LogId {
        self.id
    }

    fn writable(&self) -> bool {
        self.writable
    }

    async fn append(&self, entry: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(LogError::Closed.into());
        }
        if !self.writable {
            return Err(LogError::NotWritable {
                log_id: self.id.short(),
            }
            .into());
        }

        let seq = inner.entries.len() as u64;
        inner.entries.push(entry.to_string());
        Self::notify_tails(&mut inner, entry);

        let frame = SyncFrame {
            log_id: self.id,
            seq,
            entry: entry.to_string(),
        };
        inner.sinks.retain(|tx| tx.send(frame.clone()).is_ok());

        Ok(seq)
    }

    async fn live_tail(&self) -> Result<LiveTail> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(LogError::Closed.into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.tails.push(tx);
        Ok(LiveTail::new(rx))
    }

    async fn replicate(&self, outbound: FrameSender) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(LogError::Closed.into());
        }
        if !self.writable {
            // Read-only attachments have nothing of their own to send
            return Ok(());
        }

        for (seq, entry) in inner.entries.iter().enumerate() {
            let frame = SyncFrame {
                log_id: self.id,
                seq: seq as u64,
                entry: entry.clone(),
            };
            if outbound.send(frame).is_err() {
                // Connection already gone; its session will tear down
                debug!(log = %self.id.short(), "replication sink closed during backfill");
                return Ok(());
            }
        }
        inner.sinks.push(outbound);
        Ok(())
    }

    async fn ingest(&self, frame: SyncFrame) -> Result<()> {
        if frame.log_id != self.id {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(LogError::Closed.into());
        }

        let expected = inner.entries.len() as u64;
        if frame.seq < expected {
            // Duplicate of an already-applied entry
            return Ok(());
        }
        if frame.seq > expected {
            return Err(LogError::OutOfOrder {
                expected,
                actual: frame.seq,
            }
            .into());
        }

        inner.entries.push(frame.entry.clone());
        Self::notify_tails(&mut inner, &frame.entry);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        // Dropping the senders ends every live tail
        inner.tails.clear();
        inner.sinks.clear();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Memory Log Store
// ----------------------------------------------------------------------------

/// Log store backed by [`MemoryLog`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryLogStore;

impl MemoryLogStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn create(&self) -> Result<Arc<dyn ReplicatedLog>> {
        let log: Arc<dyn ReplicatedLog> = MemoryLog::create()?;
        Ok(log)
    }

    async fn open(&self, id: LogId) -> Result<Arc<dyn ReplicatedLog>> {
        let log: Arc<dyn ReplicatedLog> = MemoryLog::attach(id);
        Ok(log)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
