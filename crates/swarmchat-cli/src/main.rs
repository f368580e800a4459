//! Swarmchat terminal client entry point

use std::io::Write;

use clap::Parser;
use tracing::error;

use swarmchat_cli::{app::ChatApp, cli::Cli, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let username = match &cli.username {
        Some(name) => name.clone(),
        None => prompt_username()?,
    };

    let app = match ChatApp::new(&cli, username).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("Failed to join swarm: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Ask for a display name; an empty answer falls back to "Anonymous"
fn prompt_username() -> Result<String> {
    print!("Please enter your username: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    let name = line.trim();
    if name.is_empty() {
        Ok("Anonymous".to_string())
    } else {
        Ok(name.to_string())
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
