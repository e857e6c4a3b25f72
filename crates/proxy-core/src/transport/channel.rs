//! In-process transport over tokio channels.
//!
//! Both ends behave like a connection: closing a sink ends the opposite
//! source, and sending after the opposite source was dropped fails. Unlike a
//! WebSocket, nothing answers pings or close frames automatically.

use super::{Frame, FrameSink, FrameSource};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Write end of a channel transport.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Frame>>,
}

/// Read end of a channel transport.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// Two connected endpoints, each a `(sink, source)` pair.
pub fn channel_pair() -> ((ChannelSink, ChannelSource), (ChannelSink, ChannelSource)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        (ChannelSink { tx: Some(a_tx) }, ChannelSource { rx: b_rx }),
        (ChannelSink { tx: Some(b_tx) }, ChannelSource { rx: a_rx }),
    )
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ProxyError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| ProxyError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}
