//! End-to-end coordinator tests
//!
//! Two coordinators wired together over in-memory duplex connections, plus
//! scripted raw peers for protocol-level checks. No real networking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use swarmchat_core::log::FrameSender;
use swarmchat_core::{
    ChatCoordinator, ChatError, ChatEvent, ChatEvents, HandshakeMessage, JoinOptions, LiveTail,
    LogId, LogStore, MemoryLog, MemoryLogStore, MessageRouter, PeerIdentity, PeerRegistry,
    ReplicatedLog, Result, SessionState, SwarmEvent, SwarmEventSender, SwarmTransport, SyncFrame,
    TopicId, WireFrame,
};

const WAIT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Test Harness
// ----------------------------------------------------------------------------

/// Transport stub: discovery is exercised by feeding swarm events directly
struct NullSwarm;

#[async_trait]
impl SwarmTransport for NullSwarm {
    async fn join(&self, _topic: TopicId, _options: JoinOptions) -> Result<()> {
        Ok(())
    }

    async fn leave(&self, _topic: TopicId) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

struct TestPeer {
    router: Arc<MessageRouter>,
    registry: Arc<PeerRegistry>,
    events: ChatEvents,
    swarm_tx: SwarmEventSender,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    local_log: Arc<dyn ReplicatedLog>,
}

async fn spawn_peer_with_store(name: &str, store: Arc<dyn LogStore>) -> TestPeer {
    let local_log = store.create().await.unwrap();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let coordinator = ChatCoordinator::new(
        name.to_string(),
        TopicId::new([0; 32]),
        Arc::new(NullSwarm),
        local_log.clone(),
        store,
        events_tx,
    );
    coordinator.start().await.unwrap();

    let router = coordinator.router();
    let registry = coordinator.registry();
    let (swarm_tx, swarm_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(coordinator.run(swarm_rx, shutdown_rx));

    TestPeer {
        router,
        registry,
        events: events_rx,
        swarm_tx,
        shutdown_tx,
        task,
        local_log,
    }
}

async fn spawn_peer(name: &str) -> TestPeer {
    spawn_peer_with_store(name, Arc::new(MemoryLogStore::new())).await
}

fn identity(byte: u8) -> PeerIdentity {
    PeerIdentity::new([byte; 32])
}

/// Connect two coordinators with an in-memory duplex pair
fn connect(a: &TestPeer, a_identity: PeerIdentity, b: &TestPeer, b_identity: PeerIdentity) {
    let (to_b, to_a) = tokio::io::duplex(64 * 1024);
    a.swarm_tx
        .send(SwarmEvent::Connection {
            identity: b_identity,
            stream: Box::new(to_b),
        })
        .unwrap();
    b.swarm_tx
        .send(SwarmEvent::Connection {
            identity: a_identity,
            stream: Box::new(to_a),
        })
        .unwrap();
}

/// Hand one raw duplex end to a coordinator, keeping the other for the test
fn connect_scripted(peer: &TestPeer, scripted_identity: PeerIdentity) -> DuplexStream {
    let (theirs, ours) = tokio::io::duplex(64 * 1024);
    peer.swarm_tx
        .send(SwarmEvent::Connection {
            identity: scripted_identity,
            stream: Box::new(theirs),
        })
        .unwrap();
    ours
}

/// Next chat message, skipping system notices
async fn next_message(events: &mut ChatEvents) -> (String, String) {
    timeout(WAIT, async {
        loop {
            match events.recv().await.expect("event stream ended") {
                ChatEvent::Message { sender, text } => return (sender, text),
                ChatEvent::System(_) => continue,
            }
        }
    })
    .await
    .expect("no chat message arrived")
}

async fn session_state(peer: &TestPeer, of: PeerIdentity) -> Option<SessionState> {
    let entry = peer.registry.lookup(&of).await?;
    let state = entry.session().lock().await.state();
    Some(state)
}

/// Poll until the session with `of` reaches `state`
async fn wait_for_state(peer: &TestPeer, of: PeerIdentity, state: SessionState) {
    timeout(WAIT, async {
        loop {
            if session_state(peer, of).await == Some(state) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {state:?}"));
}

async fn wait_for_registry_len(peer: &TestPeer, len: usize) {
    timeout(WAIT, async {
        loop {
            if peer.registry.len().await == len {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {len} entries"));
}

fn handshake_line(log_id: LogId, username: &str) -> String {
    WireFrame::Handshake(HandshakeMessage::new(log_id, username))
        .encode()
        .unwrap()
}

// ----------------------------------------------------------------------------
// Round-trip Replication
// ----------------------------------------------------------------------------

#[tokio::test]
async fn round_trip_replication_preserves_order() {
    let mut alice = spawn_peer("alice").await;
    let mut bob = spawn_peer("bob").await;
    let (a_id, b_id) = (identity(1), identity(2));

    connect(&alice, a_id, &bob, b_id);
    wait_for_state(&alice, b_id, SessionState::Active).await;
    wait_for_state(&bob, a_id, SessionState::Active).await;

    alice.router.send("hello world").await.unwrap();
    alice.router.send("second").await.unwrap();

    assert_eq!(
        next_message(&mut bob.events).await,
        ("alice".to_string(), "hello world".to_string())
    );
    assert_eq!(
        next_message(&mut bob.events).await,
        ("alice".to_string(), "second".to_string())
    );

    // No duplicates follow
    let extra = timeout(Duration::from_millis(200), next_message(&mut bob.events)).await;
    assert!(extra.is_err(), "unexpected extra message: {extra:?}");

    // And the other direction works on the same connection
    bob.router.send("hi back").await.unwrap();
    assert_eq!(
        next_message(&mut alice.events).await,
        ("bob".to_string(), "hi back".to_string())
    );
}

#[tokio::test]
async fn entries_appended_before_connect_are_backfilled() {
    let mut alice = spawn_peer("alice").await;
    let bob = spawn_peer("bob").await;
    let (a_id, b_id) = (identity(1), identity(2));

    bob.router.send("early").await.unwrap();
    connect(&alice, a_id, &bob, b_id);

    assert_eq!(
        next_message(&mut alice.events).await,
        ("bob".to_string(), "early".to_string())
    );
}

// ----------------------------------------------------------------------------
// Handshake Idempotence
// ----------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_handshake_attaches_exactly_once() {
    let bob = spawn_peer("bob").await;
    let x_id = identity(7);
    let mut ours = connect_scripted(&bob, x_id);

    let first_log = LogId::new([0xaa; 32]);
    let second_log = LogId::new([0xbb; 32]);

    ours.write_all(handshake_line(first_log, "mallory").as_bytes())
        .await
        .unwrap();
    wait_for_state(&bob, x_id, SessionState::Active).await;

    // A second handshake, even naming a different log, is silently dropped
    ours.write_all(handshake_line(second_log, "impostor").as_bytes())
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(bob.registry.len().await, 1);
    let entry = bob.registry.lookup(&x_id).await.unwrap();
    let session = entry.session().lock().await;
    assert_eq!(session.remote_log_id(), Some(first_log));
    assert_eq!(session.display_name(), "mallory");
    assert_eq!(session.state(), SessionState::Active);
}

// ----------------------------------------------------------------------------
// Isolation Across Peers
// ----------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frames_never_affect_other_sessions() {
    let mut alice = spawn_peer("alice").await;
    let bob = spawn_peer("bob").await;
    let (a_id, b_id, x_id) = (identity(1), identity(2), identity(9));

    connect(&alice, a_id, &bob, b_id);
    wait_for_state(&bob, a_id, SessionState::Active).await;

    // A peer that only ever sends garbage
    let mut ours = connect_scripted(&bob, x_id);
    ours.write_all(b"\x00\x01 not json\n{\"type\":\"bogus\"}\n")
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    // The garbage peer never progresses past the initial handshake states
    let stuck = session_state(&bob, x_id).await.unwrap();
    assert_eq!(stuck, SessionState::HandshakeSent);

    // Alice's session is untouched and chat still flows
    assert_eq!(session_state(&bob, a_id).await, Some(SessionState::Active));
    bob.router.send("still here").await.unwrap();
    assert_eq!(
        next_message(&mut alice.events).await,
        ("bob".to_string(), "still here".to_string())
    );
}

// ----------------------------------------------------------------------------
// Teardown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn closed_connection_unregisters_session() {
    let bob = spawn_peer("bob").await;
    let x_id = identity(7);

    let ours = connect_scripted(&bob, x_id);
    wait_for_registry_len(&bob, 1).await;

    // Dropping our end closes the connection; the session must fully unwind
    drop(ours);
    wait_for_registry_len(&bob, 0).await;
}

#[tokio::test]
async fn duplicate_connection_replaces_previous_session() {
    let bob = spawn_peer("bob").await;
    let x_id = identity(7);

    let first = connect_scripted(&bob, x_id);
    wait_for_registry_len(&bob, 1).await;
    let first_entry = bob.registry.lookup(&x_id).await.unwrap();

    // Same identity connects again; the old session is torn down first
    let _second = connect_scripted(&bob, x_id);
    timeout(WAIT, async {
        loop {
            if let Some(current) = bob.registry.lookup(&x_id).await {
                if !Arc::ptr_eq(&current, &first_entry) {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("old session never replaced");

    assert_eq!(bob.registry.len().await, 1);
    assert_eq!(
        first_entry.session().lock().await.state(),
        SessionState::Closed
    );
    drop(first);
}

// ----------------------------------------------------------------------------
// Shutdown
// ----------------------------------------------------------------------------

/// Remote-log wrapper whose close always fails, counting attempts
struct FailingCloseLog {
    inner: Arc<dyn ReplicatedLog>,
    close_attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl ReplicatedLog for FailingCloseLog {
    fn id(&self) -> LogId {
        self.inner.id()
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    async fn append(&self, entry: &str) -> Result<u64> {
        self.inner.append(entry).await
    }

    async fn live_tail(&self) -> Result<LiveTail> {
        self.inner.live_tail().await
    }

    async fn replicate(&self, outbound: FrameSender) -> Result<()> {
        self.inner.replicate(outbound).await
    }

    async fn ingest(&self, frame: SyncFrame) -> Result<()> {
        self.inner.ingest(frame).await
    }

    async fn close(&self) -> Result<()> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        let _ = self.inner.close().await;
        Err(swarmchat_core::LogError::Closed.into())
    }
}

/// Store whose remote attachments refuse to close cleanly
struct FailingCloseStore {
    close_attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl LogStore for FailingCloseStore {
    async fn create(&self) -> Result<Arc<dyn ReplicatedLog>> {
        let log: Arc<dyn ReplicatedLog> = MemoryLog::create()?;
        Ok(log)
    }

    async fn open(&self, id: LogId) -> Result<Arc<dyn ReplicatedLog>> {
        Ok(Arc::new(FailingCloseLog {
            inner: MemoryLog::attach(id),
            close_attempts: self.close_attempts.clone(),
        }))
    }
}

#[tokio::test]
async fn shutdown_closes_everything_despite_individual_failures() {
    let close_attempts = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(FailingCloseStore {
        close_attempts: close_attempts.clone(),
    });
    let bob = spawn_peer_with_store("bob", store).await;

    // Two handshaken peers, each with an attached remote log
    let mut first = connect_scripted(&bob, identity(1));
    let mut second = connect_scripted(&bob, identity(2));
    first
        .write_all(handshake_line(LogId::new([1; 32]), "one").as_bytes())
        .await
        .unwrap();
    second
        .write_all(handshake_line(LogId::new([2; 32]), "two").as_bytes())
        .await
        .unwrap();
    wait_for_state(&bob, identity(1), SessionState::Active).await;
    wait_for_state(&bob, identity(2), SessionState::Active).await;

    bob.shutdown_tx.send(()).unwrap();
    timeout(WAIT, bob.task).await.unwrap().unwrap();

    // Both remote logs were attempted-closed even though every close failed
    assert_eq!(close_attempts.load(Ordering::SeqCst), 2);
    assert!(bob.registry.is_empty().await);

    // The local log was closed too
    assert!(bob.local_log.append("late").await.is_err());
}

#[tokio::test]
async fn shutdown_with_no_sessions_completes() {
    let bob = spawn_peer("bob").await;
    bob.shutdown_tx.send(()).unwrap();
    timeout(WAIT, bob.task).await.unwrap().unwrap();
    assert!(bob.local_log.append("late").await.is_err());
}

// ----------------------------------------------------------------------------
// Error-path Teardown
// ----------------------------------------------------------------------------

/// Spawn a peer whose remote-log closes are counted, connect one scripted
/// end, and drive it to `Active`
async fn activated_scripted_peer() -> (TestPeer, PeerIdentity, DuplexStream, Arc<AtomicUsize>) {
    let close_attempts = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(FailingCloseStore {
        close_attempts: close_attempts.clone(),
    });
    let peer = spawn_peer_with_store("bob", store).await;
    let x_id = identity(7);

    let mut ours = connect_scripted(&peer, x_id);
    ours.write_all(handshake_line(LogId::new([1; 32]), "one").as_bytes())
        .await
        .unwrap();
    wait_for_state(&peer, x_id, SessionState::Active).await;

    (peer, x_id, ours, close_attempts)
}

#[tokio::test]
async fn connection_error_event_tears_down_active_session() {
    let (bob, x_id, _ours, close_attempts) = activated_scripted_peer().await;
    let entry = bob.registry.lookup(&x_id).await.unwrap();

    bob.swarm_tx
        .send(SwarmEvent::ConnectionError {
            identity: x_id,
            error: ChatError::swarm("link reset"),
        })
        .unwrap();

    wait_for_registry_len(&bob, 0).await;
    assert_eq!(
        entry.session().lock().await.state(),
        SessionState::Closed
    );
    assert_eq!(close_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connection_closed_event_tears_down_active_session() {
    let (bob, x_id, _ours, close_attempts) = activated_scripted_peer().await;
    let entry = bob.registry.lookup(&x_id).await.unwrap();

    bob.swarm_tx
        .send(SwarmEvent::ConnectionClosed { identity: x_id })
        .unwrap();

    wait_for_registry_len(&bob, 0).await;
    assert_eq!(
        entry.session().lock().await.state(),
        SessionState::Closed
    );
    assert_eq!(close_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn read_failure_tears_down_session() {
    let (bob, x_id, mut ours, close_attempts) = activated_scripted_peer().await;
    let entry = bob.registry.lookup(&x_id).await.unwrap();

    // Invalid UTF-8 makes the line reader fail without reaching end of stream
    ours.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();

    wait_for_registry_len(&bob, 0).await;
    assert_eq!(
        entry.session().lock().await.state(),
        SessionState::Closed
    );
    assert_eq!(close_attempts.load(Ordering::SeqCst), 1);
}

// ----------------------------------------------------------------------------
// Local Input
// ----------------------------------------------------------------------------

#[tokio::test]
async fn whitespace_input_never_reaches_peers() {
    let alice = spawn_peer("alice").await;
    let mut bob = spawn_peer("bob").await;
    let (a_id, b_id) = (identity(1), identity(2));

    connect(&alice, a_id, &bob, b_id);
    wait_for_state(&alice, b_id, SessionState::Active).await;

    alice.router.send("   ").await.unwrap();
    alice.router.send("").await.unwrap();
    alice.router.send("real").await.unwrap();

    // Only the real line arrives
    assert_eq!(
        next_message(&mut bob.events).await,
        ("alice".to_string(), "real".to_string())
    );
    assert_eq!(alice.local_log.append("x").await.unwrap(), 1);
}
