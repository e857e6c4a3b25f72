//! Proxy Core - tunnel protocol and process supervision for proxied resources.
//!
//! A resource program reads one JSON request from stdin, writes JSON and log
//! lines to stdout, and exchanges files through a directory. This crate runs
//! such a program on a remote machine and tunnels its whole stdio session,
//! plus its file payloads, over one WebSocket connection.
//!
//! The server side is [`Session`]: it starts the program, pumps stdin and
//! stdout through the connection, logs stderr, keeps the connection alive
//! with pings, and drives interrupt/kill escalation when either side goes
//! away. The client side is [`TunnelClient`].
//!
//! # Example
//!
//! ```rust,ignore
//! use proxy_core::{ActionKind, ResourceRequest, TunnelClient};
//!
//! #[tokio::main]
//! async fn main() -> proxy_core::Result<()> {
//!     let request = ResourceRequest::from_reader(std::io::stdin())?;
//!     let url = request.endpoint(ActionKind::Check)?;
//!
//!     let client = TunnelClient::connect(&url, request.token()).await?;
//!     client.send_request(&request.forwarded()).await?;
//!
//!     let outcome = client
//!         .run(None, |line| println!("{}", line), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     eprintln!("received {} messages", outcome.messages.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod close;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod liveness;
pub mod pump;
pub mod session;
pub mod signal;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use client::{ClientOutcome, TunnelClient};
pub use close::{CloseProtocol, CloseState};
pub use codec::{decode_into, encode_directory, FileEntry};
pub use config::{ActionKind, CodecConfig, ProcessConfig, SessionTimings, TransportConfig};
pub use envelope::{ForwardedRequest, ResourceRequest};
pub use error::{ProxyError, Result};
pub use liveness::{LivenessMonitor, ReadDeadline};
pub use pump::{DiagnosticPump, InboundEnd, InboundPump, OutboundPump, OutboundReport};
pub use session::{Session, SessionOutcome, SessionReport};
pub use signal::CompletionSignal;
pub use supervisor::{EscalationOutcome, LaunchSpec, ProcessState, ProcessSupervisor};
pub use transport::{ConnectionWriter, Frame, FrameSink, FrameSource};
