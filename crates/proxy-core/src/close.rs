//! Orderly connection shutdown.
//!
//! Whoever finishes first sends a normal-closure close frame, then waits a
//! bounded grace period for the peer to acknowledge before tearing the
//! connection down. The acknowledgment is observed indirectly: the local
//! receive loop ends once the peer's close frame (or the disconnect) arrives,
//! and fires the `peer_gone` signal.

use crate::signal::CompletionSignal;
use crate::transport::{ConnectionWriter, Frame};
use std::time::Duration;
use tracing::{debug, info};

/// Where a connection is in its shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    Open,
    /// The local user asked to stop; the close frame is not sent yet.
    InterruptObserved,
    LocalCloseSent,
    Closed,
}

/// Close handshake driver for one side of a connection.
#[derive(Debug)]
pub struct CloseProtocol {
    writer: ConnectionWriter,
    grace: Duration,
    peer_gone: CompletionSignal,
    state: CloseState,
}

impl CloseProtocol {
    pub fn new(writer: ConnectionWriter, grace: Duration, peer_gone: CompletionSignal) -> Self {
        Self {
            writer,
            grace,
            peer_gone,
            state: CloseState::Open,
        }
    }

    pub fn state(&self) -> CloseState {
        self.state
    }

    pub fn observe_interrupt(&mut self) {
        if self.state == CloseState::Open {
            self.state = CloseState::InterruptObserved;
        }
    }

    /// Send the close frame, wait for the acknowledgment, then force close.
    ///
    /// Returns whether the peer acknowledged within the grace period. Calling
    /// this on an already closed protocol does nothing and returns `false`.
    pub async fn close(&mut self, reason: &str) -> bool {
        if self.state == CloseState::Closed {
            return false;
        }

        if let Err(e) = self.writer.send(Frame::normal_close(reason)).await {
            debug!("write close: {}", e);
        }
        self.state = CloseState::LocalCloseSent;

        let acknowledged = tokio::time::timeout(self.grace, self.peer_gone.wait())
            .await
            .is_ok();
        if acknowledged {
            debug!("Peer acknowledged close ({})", reason);
        } else {
            info!(
                "Peer did not acknowledge close within {:?}, closing anyway",
                self.grace
            );
        }

        self.writer.force_close().await;
        self.state = CloseState::Closed;
        acknowledged
    }
}
