//! Peer sessions
//!
//! One [`PeerSession`] per transport connection, driven through an explicit
//! state machine by a supervised task. The task sends the local handshake,
//! parses incoming lines, attaches the remote log on the first valid
//! handshake, pumps sync frames into it, and tears everything down when the
//! connection ends.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::RemoteLogAdapter;
use crate::errors::{ChatError, Result};
use crate::log::ReplicatedLog;
use crate::registry::{PeerRegistry, SessionEntry};
use crate::router::{ChatEvent, ChatEventSender, IncomingSender};
use crate::swarm::{Connection, Duplex};
use crate::types::{LogId, PeerIdentity};
use crate::wire::{HandshakeMessage, WireFrame};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Session states in the per-connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport delivered the connection
    Connected,
    /// Local handshake written
    HandshakeSent,
    /// Remote identity and name recorded
    Paired,
    /// Remote log attached, replication running, live tail subscribed
    Active,
    /// Teardown complete (terminal)
    Closed,
}

impl SessionState {
    /// State name for logging
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::HandshakeSent => "HandshakeSent",
            SessionState::Paired => "Paired",
            SessionState::Active => "Active",
            SessionState::Closed => "Closed",
        }
    }

    fn allows(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connected, SessionState::HandshakeSent)
                | (SessionState::HandshakeSent, SessionState::Paired)
                | (SessionState::Paired, SessionState::Active)
                | (_, SessionState::Closed)
        )
    }
}

// ----------------------------------------------------------------------------
// Peer Session
// ----------------------------------------------------------------------------

/// State and owned resources for one remote participant
pub struct PeerSession {
    identity: PeerIdentity,
    display_name: String,
    remote_log_id: Option<LogId>,
    remote_log: Option<Arc<dyn ReplicatedLog>>,
    state: SessionState,
}

impl PeerSession {
    /// Create a session for a freshly delivered connection. The display name
    /// starts as the anonymized identity prefix until the handshake supplies
    /// the real one.
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            display_name: identity.short(),
            remote_log_id: None,
            remote_log: None,
            state: SessionState::Connected,
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_log_id(&self) -> Option<LogId> {
        self.remote_log_id
    }

    /// Whether the one-time handshake has already been applied
    pub fn is_paired(&self) -> bool {
        self.remote_log_id.is_some()
    }

    fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.allows(next) {
            return Err(ChatError::invalid_transition(
                self.identity,
                self.state.name(),
                next.name(),
            ));
        }
        debug!(
            peer = %self.identity.short(),
            from = self.state.name(),
            to = next.name(),
            "session transition"
        );
        self.state = next;
        Ok(())
    }

    /// Record that the local handshake went out
    pub fn handshake_sent(&mut self) -> Result<()> {
        self.advance(SessionState::HandshakeSent)
    }

    /// Apply the remote handshake. Sets the identifier and display name
    /// exactly once; callers must check [`is_paired`](Self::is_paired) first.
    pub fn paired(&mut self, remote_log_id: LogId, display_name: String) -> Result<()> {
        if self.remote_log_id.is_some() {
            return Err(crate::errors::SessionError::AlreadyAttached {
                peer: self.identity.short(),
            }
            .into());
        }
        self.advance(SessionState::Paired)?;
        self.remote_log_id = Some(remote_log_id);
        self.display_name = display_name;
        Ok(())
    }

    /// Record the attached remote log and enter `Active`
    pub fn activated(&mut self, remote_log: Arc<dyn ReplicatedLog>) -> Result<()> {
        self.advance(SessionState::Active)?;
        self.remote_log = Some(remote_log);
        Ok(())
    }

    /// Enter the terminal state, yielding the remote log for release.
    /// Legal from every state; idempotent.
    pub fn close(&mut self) -> Option<Arc<dyn ReplicatedLog>> {
        self.state = SessionState::Closed;
        self.remote_log.take()
    }

    /// Clone of the attached remote log, if any
    pub fn remote_log(&self) -> Option<Arc<dyn ReplicatedLog>> {
        self.remote_log.clone()
    }
}

// ----------------------------------------------------------------------------
// Session Task
// ----------------------------------------------------------------------------

/// Everything a session task needs from the coordinator
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub registry: Arc<PeerRegistry>,
    pub adapter: RemoteLogAdapter,
    pub local_log: Arc<dyn ReplicatedLog>,
    pub local_name: String,
    pub incoming: IncomingSender,
    pub events: ChatEventSender,
}

/// Drive one peer connection to completion.
///
/// Failures here are contained to this session: the connection is torn down,
/// the registry entry removed, and the remote log released, but no error
/// escapes to the caller.
pub(crate) async fn run_session(entry: Arc<SessionEntry>, stream: Connection, ctx: SessionContext) {
    let identity = entry.session().lock().await.identity();
    let (reader, writer) = tokio::io::split(stream);

    // Writer task owns the write half; everything outbound goes through it
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_frames(writer, frame_rx));

    // Handshake goes out immediately, before any replication traffic
    let hello = WireFrame::Handshake(HandshakeMessage::new(
        ctx.local_log.id(),
        ctx.local_name.clone(),
    ));
    let sent = frame_tx.send(hello).is_ok();
    if sent {
        let mut session = entry.session().lock().await;
        if let Err(e) = session.handshake_sent() {
            warn!(peer = %identity.short(), error = %e, "handshake state error");
        }
    }

    let mut tail_task = None;
    if sent {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Err(e) =
                        handle_line(&entry, identity, &line, &frame_tx, &ctx, &mut tail_task).await
                    {
                        warn!(peer = %identity.short(), error = %e, "abandoning session");
                        break;
                    }
                }
                Ok(None) => {
                    info!(peer = %identity.short(), "connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %identity.short(), error = %e, "connection error");
                    break;
                }
            }
        }
    }

    // Teardown: release the remote log, then drop the registry entry, but
    // only if a duplicate connection has not already replaced it
    let display_name = {
        let mut session = entry.session().lock().await;
        let name = session.display_name().to_string();
        if let Some(remote_log) = session.close() {
            drop(session);
            if let Err(e) = remote_log.close().await {
                warn!(peer = %identity.short(), error = %e, "failed to close remote log");
            }
        }
        name
    };
    if let Some(task) = tail_task {
        task.abort();
    }
    writer_task.abort();
    ctx.registry.remove_if(&identity, &entry).await;
    let _ = ctx.events.send(ChatEvent::System(format!(
        "connection closed with {display_name}"
    )));
}

/// Process one received line. `Ok` means keep reading; `Err` abandons the
/// session. Only log-attachment failures do that; malformed lines are
/// discarded.
async fn handle_line(
    entry: &Arc<SessionEntry>,
    identity: PeerIdentity,
    line: &str,
    frame_tx: &mpsc::UnboundedSender<WireFrame>,
    ctx: &SessionContext,
    tail_task: &mut Option<tokio::task::JoinHandle<()>>,
) -> Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }

    let frame = match WireFrame::decode(line) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(peer = %identity.short(), error = %e, "discarding malformed frame");
            return Ok(());
        }
    };

    match frame {
        WireFrame::Handshake(msg) => {
            if let Err(e) = msg.validate() {
                debug!(peer = %identity.short(), error = %e, "discarding invalid handshake");
                return Ok(());
            }

            {
                let mut session = entry.session().lock().await;
                if session.is_paired() {
                    // Idempotent: a repeated handshake must not re-attach
                    debug!(peer = %identity.short(), "duplicate handshake ignored");
                    return Ok(());
                }
                session.paired(msg.log_id, msg.username.clone())?;
            }
            info!(
                peer = %identity.short(),
                name = %msg.username,
                log = %msg.log_id.short(),
                "handshake received"
            );

            // Attach the remote log; failure abandons this session only
            let remote_log = ctx.adapter.attach(msg.log_id).await.map_err(|e| {
                let _ = ctx.events.send(ChatEvent::System(format!(
                    "could not open log for {}: {e}",
                    msg.username
                )));
                e
            })?;

            ctx.adapter
                .begin_replication(frame_tx.clone(), &ctx.local_log, &remote_log)
                .await?;
            *tail_task = Some(
                ctx.adapter
                    .spawn_live_tail(remote_log.clone(), identity, ctx.incoming.clone()),
            );

            entry.session().lock().await.activated(remote_log)?;
            let _ = ctx.events.send(ChatEvent::System(format!(
                "ready to chat with {}",
                msg.username
            )));
        }
        WireFrame::Sync(sync) => {
            let remote_log = entry.session().lock().await.remote_log();
            match remote_log {
                Some(log) => {
                    if let Err(e) = log.ingest(sync).await {
                        warn!(peer = %identity.short(), error = %e, "dropping sync frame");
                    }
                }
                None => {
                    debug!(peer = %identity.short(), "sync frame before handshake, discarding");
                }
            }
        }
    }

    Ok(())
}

/// Serialize outbound frames onto the write half, one JSON line each
async fn write_frames(
    mut writer: WriteHalf<Box<dyn Duplex>>,
    mut frames: mpsc::UnboundedReceiver<WireFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let line = match frame.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode frame");
                continue;
            }
        };
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLog;

    fn test_identity(byte: u8) -> PeerIdentity {
        PeerIdentity::new([byte; 32])
    }

    #[test]
    fn test_new_session_uses_anonymized_name() {
        let session = PeerSession::new(test_identity(0xcd));
        assert_eq!(session.display_name(), "cdcdcd...");
        assert_eq!(session.state(), SessionState::Connected);
        assert!(!session.is_paired());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = PeerSession::new(test_identity(1));
        session.handshake_sent().unwrap();
        session
            .paired(LogId::new([2; 32]), "alice".to_string())
            .unwrap();
        assert_eq!(session.display_name(), "alice");
        assert_eq!(session.state(), SessionState::Paired);

        let log = MemoryLog::attach(LogId::new([2; 32]));
        session.activated(log).unwrap();
        assert_eq!(session.state(), SessionState::Active);

        assert!(session.close().is_some());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_pairing_is_set_at_most_once() {
        let mut session = PeerSession::new(test_identity(1));
        session.handshake_sent().unwrap();
        session
            .paired(LogId::new([2; 32]), "alice".to_string())
            .unwrap();
        let err = session.paired(LogId::new([3; 32]), "mallory".to_string());
        assert!(err.is_err());
        assert_eq!(session.remote_log_id(), Some(LogId::new([2; 32])));
        assert_eq!(session.display_name(), "alice");
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut session = PeerSession::new(test_identity(1));
        // Cannot pair before the local handshake went out
        let err = session.paired(LogId::new([2; 32]), "alice".to_string());
        assert!(err.is_err());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_close_from_any_state() {
        let mut session = PeerSession::new(test_identity(1));
        assert!(session.close().is_none());
        assert_eq!(session.state(), SessionState::Closed);
        // Idempotent
        assert!(session.close().is_none());
    }
}
