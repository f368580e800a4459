//! swarmchat core
//!
//! Serverless peer-to-peer chat over replicated logs. A swarm transport
//! discovers participants on a shared rendezvous topic and delivers one
//! duplex connection per peer; each connection gets a one-round handshake
//! exchanging log identifiers and display names, after which the two sides'
//! append-only logs replicate over that same connection and each side tails
//! the other's log live.
//!
//! The centerpiece is [`ChatCoordinator`], which runs one supervised
//! [`session::PeerSession`] per connection, keeps the [`PeerRegistry`]
//! consistent, routes chat lines through the [`MessageRouter`], and owns the
//! ordered shutdown sequence. The swarm transport and the replicated log are
//! collaborator traits ([`swarm::SwarmTransport`], [`log::ReplicatedLog`]);
//! an in-memory log lives in [`memory`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod adapter;
pub mod coordinator;
pub mod errors;
pub mod log;
pub mod memory;
pub mod registry;
pub mod router;
pub mod session;
pub mod swarm;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use adapter::RemoteLogAdapter;
pub use coordinator::ChatCoordinator;
pub use errors::{ChatError, HandshakeError, LogError, Result, SessionError};
pub use log::{LiveTail, LogStore, ReplicatedLog};
pub use memory::{MemoryLog, MemoryLogStore};
pub use registry::{PeerRegistry, SessionEntry};
pub use router::{ChatEvent, ChatEventSender, ChatEvents, MessageRouter};
pub use session::{PeerSession, SessionState};
pub use swarm::{Connection, JoinOptions, SwarmEvent, SwarmEventSender, SwarmEvents, SwarmTransport};
pub use types::{LogId, PeerIdentity, TopicId};
pub use wire::{HandshakeMessage, SyncFrame, WireFrame};
