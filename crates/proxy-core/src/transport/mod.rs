//! Message-oriented transport seam.
//!
//! Pumps and sessions talk to the connection through [`FrameSink`] and
//! [`FrameSource`] only. The server adapts axum's WebSocket to them, the
//! client adapts tokio-tungstenite ([`tungstenite`]), and tests use the
//! in-process [`channel`] transport.
//!
//! All writers of one connection (the outbound pump, the liveness monitor and
//! the close protocol) go through one [`ConnectionWriter`], which serializes
//! whole messages behind a mutex and bounds each write by the write wait.

pub mod channel;
pub mod tungstenite;

use crate::error::{ProxyError, Result};
use crate::signal::CompletionSignal;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when a close frame carried no code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// One message or control frame on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

impl Frame {
    /// Normal-closure close frame with a reason.
    pub fn normal_close(reason: impl Into<String>) -> Self {
        Frame::Close {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
        }
    }

    /// Payload length for data frames, zero for control frames.
    pub fn data_len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
            _ => 0,
        }
    }
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one complete frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Shut the connection down from this side.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Receive the next frame, or `None` once the connection is gone.
    async fn recv(&mut self) -> Option<Result<Frame>>;
}

/// Shared, serialized write access to one connection.
///
/// Cloning is cheap; every clone writes through the same lock. Once
/// [`force_close`](Self::force_close) ran, every send fails with
/// [`ProxyError::ConnectionClosed`] and the [`closed`](Self::closed) signal is
/// fired so readers can stop waiting on the connection.
#[derive(Clone)]
pub struct ConnectionWriter {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    write_wait: Duration,
    closed: CompletionSignal,
}

impl std::fmt::Debug for ConnectionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWriter")
            .field("write_wait", &self.write_wait)
            .field("closed", &self.closed.is_fired())
            .finish_non_exhaustive()
    }
}

impl ConnectionWriter {
    pub fn new(sink: impl FrameSink, write_wait: Duration) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            write_wait,
            closed: CompletionSignal::new(),
        }
    }

    /// Send a frame, giving up after the write wait.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_fired() {
            return Err(ProxyError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_wait, sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout(self.write_wait)),
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Frame::Text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Frame::Binary(data.into())).await
    }

    /// Send an empty ping control frame.
    pub async fn ping(&self) -> Result<()> {
        self.send(Frame::Ping(Vec::new())).await
    }

    /// Close the underlying connection regardless of the peer's state.
    ///
    /// Only the first call does anything.
    pub async fn force_close(&self) {
        if !self.closed.fire() {
            return;
        }

        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_wait, sink.close()).await {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => debug!("Closing connection: {}", e),
            Err(_) => debug!("Closing connection timed out"),
        }
    }

    /// Signal fired once the connection was force-closed.
    pub fn closed(&self) -> CompletionSignal {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    pub fn write_wait(&self) -> Duration {
        self.write_wait
    }
}
