//! Proxy Server - runs resource programs on behalf of remote proxy resources.
//!
//! Every configured action (`check`, `in`, `out`) is served as a WebSocket
//! endpoint. A request carrying the right bearer token is upgraded and handed
//! to a [`proxy_core::Session`], which runs the action's program for the
//! lifetime of the connection.

pub mod auth;
pub mod handler;
pub mod server;
pub mod socket;

pub use auth::{authorize, generate_token};
pub use server::{build_router, start_server, ServerConfig};
