//! Swarmchat CLI library
//!
//! Components of the swarmchat terminal client: argument parsing, the TCP
//! swarm transport, and the interactive application loop.

pub mod app;
pub mod cli;
pub mod error;
pub mod net;

pub use app::ChatApp;
pub use cli::Cli;
pub use error::{CliError, Result};
pub use net::{derive_topic, TcpSwarm};

// Re-export commonly used types
pub use swarmchat_core::{ChatCoordinator, ChatEvent, LogId, PeerIdentity, TopicId};
