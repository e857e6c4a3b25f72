//! Proxy Server - runs Concourse resource programs for remote proxy resources.
//!
//! Each action given on the command line is served as a WebSocket endpoint
//! (`/check`, `/in`, `/out`). Clients authenticate with a shared token.

use anyhow::{bail, Context, Result};
use clap::Parser;
use proxy_core::{ActionKind, TransportConfig};
use proxy_server::{generate_token, start_server, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "proxy-server")]
#[command(about = "Runs Concourse resource programs on behalf of proxy resources")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = TransportConfig::DEFAULT_ADDR)]
    addr: SocketAddr,

    /// Program serving the check action
    #[arg(long)]
    check: Option<String>,

    /// Program serving the in action
    #[arg(long = "in")]
    in_program: Option<String>,

    /// Program serving the out action
    #[arg(long)]
    out: Option<String>,

    /// Token clients must present (generated when omitted)
    #[arg(long)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Resolve a program name the way a shell would.
fn resolve_program(action: ActionKind, name: &str) -> Result<PathBuf> {
    which::which(name).with_context(|| format!("Program for {} not found: {}", action, name))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting proxy server");

    let token = match args.token {
        Some(token) if !token.is_empty() => token,
        Some(_) => bail!("--token must not be empty"),
        None => {
            let token = generate_token();
            info!("Generated auth token: {}", token);
            token
        }
    };

    let mut config = ServerConfig::new(args.addr, token);
    let requested = [
        (ActionKind::Check, args.check),
        (ActionKind::In, args.in_program),
        (ActionKind::Out, args.out),
    ];
    for (action, name) in requested {
        if let Some(name) = name {
            config = config.with_program(action, resolve_program(action, &name)?);
        }
    }

    if config.actions().is_empty() {
        bail!("At least one of --check, --in or --out is required");
    }

    let addr = start_server(config).await?;
    info!("Proxy server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
