//! Connection liveness: periodic pings out, a pong-renewed read deadline in.
//!
//! The monitor pings every `ping_period` until the outbound pump completes.
//! The peer answers with pongs, which the inbound pump feeds into its
//! [`ReadDeadline`]. Without a pong for `pong_wait` the next read fails.

use crate::signal::CompletionSignal;
use crate::transport::ConnectionWriter;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Absolute read deadline, pushed forward on every pong.
#[derive(Debug, Clone, Copy)]
pub struct ReadDeadline {
    window: Duration,
    at: Instant,
}

impl ReadDeadline {
    /// Deadline `window` from now.
    pub fn start(window: Duration) -> Self {
        Self {
            window,
            at: Instant::now() + window,
        }
    }

    /// Push the deadline to `window` from now.
    pub fn renew(&mut self) {
        self.at = Instant::now() + self.window;
    }

    pub fn instant(&self) -> Instant {
        self.at
    }
}

/// Periodic pinger for one connection.
#[derive(Debug)]
pub struct LivenessMonitor {
    writer: ConnectionWriter,
    period: Duration,
}

impl LivenessMonitor {
    pub fn new(writer: ConnectionWriter, period: Duration) -> Self {
        Self { writer, period }
    }

    /// Ping until `stop` fires. Returns the number of pings sent.
    ///
    /// A failed ping is logged and does not end the loop; the read deadline
    /// on the other side of the connection takes care of dead peers.
    pub async fn run(self, stop: CompletionSignal) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0;

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                _ = ticker.tick() => {
                    match self.writer.ping().await {
                        Ok(()) => sent += 1,
                        Err(e) => warn!("ping: {}", e),
                    }
                }
            }
        }

        debug!("Liveness monitor stopped after {} pings", sent);
        sent
    }

    pub fn spawn(self, stop: CompletionSignal) -> JoinHandle<u64> {
        tokio::spawn(self.run(stop))
    }
}
