//! Peer session coordinator
//!
//! The component everything else hangs off: consumes swarm events, runs one
//! supervised session task per delivered connection, keeps the peer registry
//! consistent, and owns the ordered shutdown sequence. Failures or delays in
//! one session never starve another; only startup failures are fatal.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapter::RemoteLogAdapter;
use crate::errors::{ChatError, Result};
use crate::log::{LogStore, ReplicatedLog};
use crate::registry::{PeerRegistry, SessionEntry};
use crate::router::{ChatEvent, ChatEventSender, MessageRouter};
use crate::session::{run_session, PeerSession, SessionContext};
use crate::swarm::{JoinOptions, SwarmEvent, SwarmEvents, SwarmTransport};
use crate::types::{LogId, TopicId};

/// Coordinates every peer session for one process
pub struct ChatCoordinator {
    topic: TopicId,
    local_name: String,
    swarm: Arc<dyn SwarmTransport>,
    local_log: Arc<dyn ReplicatedLog>,
    registry: Arc<PeerRegistry>,
    adapter: RemoteLogAdapter,
    router: Arc<MessageRouter>,
    router_task: JoinHandle<()>,
    events: ChatEventSender,
}

impl ChatCoordinator {
    /// Wire up the coordinator around an already-created local log
    pub fn new(
        local_name: String,
        topic: TopicId,
        swarm: Arc<dyn SwarmTransport>,
        local_log: Arc<dyn ReplicatedLog>,
        store: Arc<dyn LogStore>,
        events: ChatEventSender,
    ) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let (router, router_task) =
            MessageRouter::spawn(local_log.clone(), registry.clone(), events.clone());

        Self {
            topic,
            local_name,
            swarm,
            local_log,
            registry,
            adapter: RemoteLogAdapter::new(store),
            router: Arc::new(router),
            router_task,
            events,
        }
    }

    /// The router used to submit local chat lines
    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    /// The registry of active sessions
    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    /// Public identifier of the local log, to share with peers
    pub fn local_log_id(&self) -> LogId {
        self.local_log.id()
    }

    /// Join the rendezvous topic. A failure here is a critical startup
    /// error; callers abort rather than run without discovery.
    pub async fn start(&self) -> Result<()> {
        self.swarm.join(self.topic, JoinOptions::default()).await
    }

    /// Consume swarm events until the transport or the shutdown signal ends
    /// the loop, then run the shutdown sequence
    pub async fn run(self, mut swarm_events: SwarmEvents, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                event = swarm_events.recv() => match event {
                    Some(event) => self.handle_swarm_event(event).await,
                    None => {
                        warn!("swarm event stream ended");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
    }

    async fn handle_swarm_event(&self, event: SwarmEvent) {
        match event {
            SwarmEvent::Connection { identity, stream } => {
                info!(peer = %identity.short(), "new connection");
                let _ = self.events.send(ChatEvent::System(format!(
                    "new connection from potential peer {}",
                    identity.short()
                )));

                // A duplicate identity means a stale or competing connection;
                // the old session is fully released before the new one runs
                if let Some(old) = self.registry.remove(&identity).await {
                    warn!(peer = %identity.short(), "duplicate connection, tearing down previous session");
                    old.teardown().await;
                }

                let entry = SessionEntry::new(PeerSession::new(identity));
                self.registry.register(identity, entry.clone()).await;

                let ctx = SessionContext {
                    registry: self.registry.clone(),
                    adapter: self.adapter.clone(),
                    local_log: self.local_log.clone(),
                    local_name: self.local_name.clone(),
                    incoming: self.router.incoming_sender(),
                    events: self.events.clone(),
                };
                let handle = tokio::spawn(run_session(entry.clone(), stream, ctx));
                entry.set_task(handle);
            }

            SwarmEvent::ConnectionClosed { identity } => {
                if let Some(entry) = self.registry.remove(&identity).await {
                    entry.teardown().await;
                }
            }

            SwarmEvent::ConnectionError { identity, error } => {
                warn!(peer = %identity.short(), error = %error, "connection error");
                if let Some(entry) = self.registry.remove(&identity).await {
                    entry.teardown().await;
                }
            }
        }
    }

    /// Ordered shutdown: leave the swarm, close the local log, then release
    /// every remaining session. Each closure is attempted independently;
    /// failures are logged and never abort the remaining steps.
    async fn shutdown(self) {
        info!("shutting down");

        if let Err(e) = self.swarm.leave(self.topic).await {
            log_release_failure("swarm topic", e);
        }
        if let Err(e) = self.swarm.shutdown().await {
            log_release_failure("swarm transport", e);
        }

        if let Err(e) = self.local_log.close().await {
            log_release_failure("local log", e);
        }

        for (identity, entry) in self.registry.drain().await {
            info!(peer = %identity.short(), "closing session");
            entry.teardown().await;
        }

        self.router_task.abort();
        let _ = self.events.send(ChatEvent::System("exited".to_string()));
        info!("shutdown complete");
    }
}

fn log_release_failure(resource: &str, cause: ChatError) {
    let err = ChatError::shutdown(resource, cause.to_string());
    warn!(error = %err, "shutdown step failed");
}
