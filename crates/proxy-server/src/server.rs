//! HTTP server implementation using Axum.

use crate::handler::{handle_action, handle_health};
use axum::{routing::get, Router};
use proxy_core::{ActionKind, SessionTimings, TransportConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Server configuration shared across handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 picks a free port)
    pub addr: SocketAddr,
    /// Shared secret clients must present
    pub token: String,
    /// Program run for each served action
    pub programs: HashMap<ActionKind, PathBuf>,
    /// Timings applied to every session
    pub timings: SessionTimings,
}

impl ServerConfig {
    pub fn new(addr: SocketAddr, token: impl Into<String>) -> Self {
        Self {
            addr,
            token: token.into(),
            programs: HashMap::new(),
            timings: SessionTimings::default(),
        }
    }

    /// Configuration listening on the default address.
    pub fn with_default_addr(token: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self::new(TransportConfig::DEFAULT_ADDR.parse()?, token))
    }

    pub fn with_program(mut self, action: ActionKind, program: impl Into<PathBuf>) -> Self {
        self.programs.insert(action, program.into());
        self
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn program(&self, action: ActionKind) -> Option<&PathBuf> {
        self.programs.get(&action)
    }

    /// Served actions in a stable order.
    pub fn actions(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|action| self.programs.contains_key(action))
            .collect()
    }
}

/// Build the router for `config`.
pub fn build_router(config: Arc<ServerConfig>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/:action", get(handle_action))
        .layer(TraceLayer::new_for_http())
        .with_state(config)
}

/// Start the proxy server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(config: ServerConfig) -> anyhow::Result<SocketAddr> {
    let addr = config.addr;
    for action in config.actions() {
        if let Some(program) = config.program(action) {
            info!("Serving {} with {}", action.path(), program.display());
        }
    }

    let app = build_router(Arc::new(config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
