//! Interactive chat application
//!
//! Wires a [`ChatCoordinator`] to the terminal: stdin lines become appends to
//! the local log, chat events become printed lines, and Ctrl-C triggers the
//! ordered shutdown sequence before the process exits.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use swarmchat_core::{
    ChatCoordinator, ChatEvent, ChatEvents, LogStore, MemoryLogStore, MessageRouter, Result,
    SwarmEvents,
};

use crate::cli::Cli;
use crate::error::CliError;
use crate::net::{derive_topic, TcpSwarm};

/// Fully wired chat node ready to run the interactive loop
pub struct ChatApp {
    router: Arc<MessageRouter>,
    events: ChatEvents,
    swarm_events: SwarmEvents,
    coordinator: ChatCoordinator,
    topic_name: String,
    username: String,
}

impl ChatApp {
    /// Build the store, transport, and coordinator from parsed arguments
    pub async fn new(cli: &Cli, username: String) -> Result<Self> {
        let store = Arc::new(MemoryLogStore::new());
        let local_log = store.create().await?;

        let (swarm, swarm_events) = TcpSwarm::new(cli.listen, cli.peers.clone())?;
        let (event_tx, events) = tokio::sync::mpsc::unbounded_channel();

        let coordinator = ChatCoordinator::new(
            username.clone(),
            derive_topic(&cli.topic),
            swarm,
            local_log,
            store,
            event_tx,
        );
        let router = coordinator.router();

        Ok(Self {
            router,
            events,
            swarm_events,
            coordinator,
            topic_name: cli.topic.clone(),
            username,
        })
    }

    /// Join the swarm and run the terminal loop until Ctrl-C
    pub async fn run(self) -> std::result::Result<(), CliError> {
        let Self {
            router,
            mut events,
            swarm_events,
            coordinator,
            topic_name,
            username,
        } = self;

        println!("[system] joining topic \"{topic_name}\"");
        println!(
            "[system] your log id (share with peers): {}",
            coordinator.local_log_id().to_hex()
        );
        println!("[system] welcome, {username}. Type a message and press enter.");

        coordinator.start().await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let coordinator_task = tokio::spawn(coordinator.run(swarm_events, shutdown_rx));

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    println!("[system] shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => print_event(event),
                        None => {
                            debug!("event channel closed");
                            break;
                        }
                    }
                }
                line = stdin.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Err(e) = router.send(&line).await {
                                warn!(error = %e, "could not send message");
                            }
                        }
                        // Stdin closed (piped input ran out) behaves like Ctrl-C
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "stdin read failed");
                            break;
                        }
                    }
                }
            }
        }

        if shutdown_tx.send(()).is_err() {
            debug!("coordinator already gone at shutdown");
        }
        if let Err(e) = coordinator_task.await {
            warn!(error = %e, "coordinator task did not exit cleanly");
        }

        // Deliver anything that arrived while shutdown was in flight
        while let Ok(event) = events.try_recv() {
            print_event(event);
        }

        Ok(())
    }
}

fn print_event(event: ChatEvent) {
    match event {
        ChatEvent::Message { sender, text } => println!("{sender}: {text}"),
        ChatEvent::System(text) => println!("[system] {text}"),
    }
}
