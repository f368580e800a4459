//! Remote log adapter
//!
//! Once a handshake names a remote log, this adapter opens it read-only,
//! wires both logs onto the connection's frame channel, and spawns the live
//! tail feeding that peer's entries to the message router. Both logs share
//! the one connection; the handshake has already gone out by the time any
//! sync frame is written, so the two never interleave ambiguously.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{ChatError, Result};
use crate::log::{LogStore, ReplicatedLog};
use crate::router::IncomingSender;
use crate::types::{LogId, PeerIdentity};
use crate::wire::WireFrame;

/// Opens remote logs and drives their replication
#[derive(Clone)]
pub struct RemoteLogAdapter {
    store: Arc<dyn LogStore>,
}

impl RemoteLogAdapter {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Open a read-only handle to the log named by `id`. Called at most once
    /// per session, guarded by handshake idempotence.
    pub async fn attach(&self, id: LogId) -> Result<Arc<dyn ReplicatedLog>> {
        self.store
            .open(id)
            .await
            .map_err(|e| ChatError::log_open(e.to_string()))
    }

    /// Start replicating both logs over the connection's outbound frame
    /// channel. Does not block; a failure here (log or connection already
    /// closed) is a normal teardown trigger, not a fatal error.
    pub async fn begin_replication(
        &self,
        outbound: mpsc::UnboundedSender<WireFrame>,
        local_log: &Arc<dyn ReplicatedLog>,
        remote_log: &Arc<dyn ReplicatedLog>,
    ) -> Result<()> {
        let (sync_tx, mut sync_rx) = mpsc::unbounded_channel();

        // Bridge sync frames onto the connection's writer; ends when either
        // side of it goes away
        tokio::spawn(async move {
            while let Some(frame) = sync_rx.recv().await {
                if outbound.send(WireFrame::Sync(frame)).is_err() {
                    break;
                }
            }
        });

        local_log.replicate(sync_tx.clone()).await?;
        remote_log.replicate(sync_tx).await?;
        Ok(())
    }

    /// Subscribe the remote log's live tail and forward each entry, in the
    /// remote peer's append order, to the message router. The task ends when
    /// the log handle is closed.
    pub fn spawn_live_tail(
        &self,
        remote_log: Arc<dyn ReplicatedLog>,
        identity: PeerIdentity,
        incoming: IncomingSender,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tail = match remote_log.live_tail().await {
                Ok(tail) => tail,
                Err(e) => {
                    warn!(peer = %identity.short(), error = %e, "could not subscribe live tail");
                    return;
                }
            };
            while let Some(entry) = tail.next_entry().await {
                if incoming.send((identity, entry)).is_err() {
                    break;
                }
            }
            debug!(peer = %identity.short(), "live tail ended");
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLog, MemoryLogStore};

    #[tokio::test]
    async fn test_attach_opens_read_only_handle() {
        let adapter = RemoteLogAdapter::new(Arc::new(MemoryLogStore::new()));
        let id = LogId::new([6; 32]);
        let log = adapter.attach(id).await.unwrap();
        assert_eq!(log.id(), id);
        assert!(!log.writable());
    }

    #[tokio::test]
    async fn test_begin_replication_forwards_local_appends() {
        let adapter = RemoteLogAdapter::new(Arc::new(MemoryLogStore::new()));
        let local: Arc<dyn ReplicatedLog> = MemoryLog::create().unwrap();
        let remote: Arc<dyn ReplicatedLog> = MemoryLog::attach(LogId::new([1; 32]));

        let (outbound, mut rx) = mpsc::unbounded_channel();
        adapter
            .begin_replication(outbound, &local, &remote)
            .await
            .unwrap();

        local.append("hi").await.unwrap();
        match rx.recv().await.unwrap() {
            WireFrame::Sync(frame) => {
                assert_eq!(frame.log_id, local.id());
                assert_eq!(frame.entry, "hi");
            }
            other => panic!("expected sync frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_tail_feeds_incoming_channel() {
        let adapter = RemoteLogAdapter::new(Arc::new(MemoryLogStore::new()));
        let remote: Arc<dyn ReplicatedLog> = MemoryLog::create().unwrap();
        let identity = PeerIdentity::new([9; 32]);

        let (incoming, mut rx) = mpsc::unbounded_channel();
        let task = adapter.spawn_live_tail(remote.clone(), identity, incoming);

        remote.append("tailed").await.unwrap();
        let (from, entry) = rx.recv().await.unwrap();
        assert_eq!(from, identity);
        assert_eq!(entry, "tailed");

        remote.close().await.unwrap();
        task.await.unwrap();
    }
}
