//! TCP swarm transport
//!
//! A [`SwarmTransport`] over plain TCP with statically configured peers:
//! `--listen` announces, each `--peer` is looked up by dialing it. Every
//! connection starts with a 64-byte preamble (topic, then this node's random
//! 32-byte id) so both sides learn a connection-derived peer identity and
//! connections on the wrong topic are dropped before reaching the
//! coordinator. Real DHT-style discovery would slot in behind the same trait.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use swarmchat_core::{
    ChatError, JoinOptions, PeerIdentity, Result, SwarmEvent, SwarmEventSender, SwarmEvents,
    SwarmTransport, TopicId,
};

/// Derive the fixed-size rendezvous topic from its human-readable name
pub fn derive_topic(name: &str) -> TopicId {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    TopicId::new(bytes)
}

// ----------------------------------------------------------------------------
// TCP Swarm
// ----------------------------------------------------------------------------

const DIAL_ATTEMPTS: u32 = 6;
const DIAL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Swarm transport over TCP with a static peer list
pub struct TcpSwarm {
    node_id: PeerIdentity,
    listen: Option<SocketAddr>,
    peers: Vec<SocketAddr>,
    events: SwarmEventSender,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    dial_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpSwarm {
    /// Create the transport and the event stream it will deliver
    /// connections on
    pub fn new(
        listen: Option<SocketAddr>,
        peers: Vec<SocketAddr>,
    ) -> Result<(Arc<Self>, SwarmEvents)> {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| ChatError::swarm(format!("rng failure: {e}")))?;

        let (events, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let swarm = Arc::new(Self {
            node_id: PeerIdentity::new(bytes),
            listen,
            peers,
            events,
            listener_task: Mutex::new(None),
            dial_tasks: Mutex::new(Vec::new()),
        });
        Ok((swarm, events_rx))
    }

    /// This node's transport identity
    pub fn node_id(&self) -> PeerIdentity {
        self.node_id
    }

    fn stop_listener(&self) {
        let task = self
            .listener_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[async_trait]
impl SwarmTransport for TcpSwarm {
    async fn join(&self, topic: TopicId, options: JoinOptions) -> Result<()> {
        if options.announce {
            if let Some(addr) = self.listen {
                let listener = TcpListener::bind(addr).await?;
                info!(%addr, "listening for peers");

                let node_id = self.node_id;
                let events = self.events.clone();
                let task = tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, remote)) => {
                                debug!(%remote, "inbound connection");
                                let events = events.clone();
                                tokio::spawn(establish(stream, topic, node_id, events));
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                });
                if let Ok(mut slot) = self.listener_task.lock() {
                    *slot = Some(task);
                }
            }
        }

        if options.lookup {
            for addr in self.peers.clone() {
                let node_id = self.node_id;
                let events = self.events.clone();
                let task = tokio::spawn(async move {
                    for attempt in 1..=DIAL_ATTEMPTS {
                        match TcpStream::connect(addr).await {
                            Ok(stream) => {
                                debug!(%addr, "outbound connection");
                                establish(stream, topic, node_id, events).await;
                                return;
                            }
                            Err(e) if attempt < DIAL_ATTEMPTS => {
                                debug!(%addr, attempt, error = %e, "dial failed, retrying");
                                tokio::time::sleep(DIAL_RETRY_DELAY).await;
                            }
                            Err(e) => {
                                warn!(%addr, error = %e, "could not reach peer");
                            }
                        }
                    }
                });
                if let Ok(mut tasks) = self.dial_tasks.lock() {
                    tasks.push(task);
                }
            }
        }

        Ok(())
    }

    async fn leave(&self, _topic: TopicId) -> Result<()> {
        // Stop accepting; existing connections stay with their sessions
        self.stop_listener();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop_listener();
        let tasks = match self.dial_tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Exchange the connection preamble and hand the stream to the coordinator
async fn establish(
    mut stream: TcpStream,
    topic: TopicId,
    node_id: PeerIdentity,
    events: SwarmEventSender,
) {
    let _ = stream.set_nodelay(true);
    let identity = match preamble(&mut stream, topic, node_id).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "connection rejected during preamble");
            return;
        }
    };
    let _ = events.send(SwarmEvent::Connection {
        identity,
        stream: Box::new(stream),
    });
}

/// Write topic + node id, read the peer's, and reject topic mismatches
async fn preamble(
    stream: &mut TcpStream,
    topic: TopicId,
    node_id: PeerIdentity,
) -> std::io::Result<PeerIdentity> {
    stream.write_all(topic.as_bytes()).await?;
    stream.write_all(node_id.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = [0u8; 64];
    stream.read_exact(&mut buf).await?;

    let mut topic_bytes = [0u8; 32];
    topic_bytes.copy_from_slice(&buf[..32]);
    let remote_topic = TopicId::new(topic_bytes);
    if remote_topic != topic {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "peer is on a different topic",
        ));
    }
    Ok(PeerIdentity::from_bytes(&buf[32..]))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
