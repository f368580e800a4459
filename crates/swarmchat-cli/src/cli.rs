//! Command line interface definitions

use std::net::SocketAddr;

use clap::Parser;

/// swarmchat - serverless peer-to-peer chat over replicated logs
#[derive(Parser, Debug)]
#[command(name = "swarmchat")]
#[command(about = "Serverless P2P chat over replicated logs")]
#[command(version)]
pub struct Cli {
    /// Display name to use; prompted for interactively when omitted
    #[arg(short, long)]
    pub username: Option<String>,

    /// Rendezvous topic string shared by all participants
    #[arg(long, default_value = "swarmchat-lobby-v1")]
    pub topic: String,

    /// Address to accept peer connections on (announce)
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Peer address to connect to (lookup); repeatable
    #[arg(long = "peer")]
    pub peers: Vec<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
