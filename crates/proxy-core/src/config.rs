//! Centralized configuration for the resource proxy.
//!
//! Compile-time defaults live on the `*Config` structs as associated constants.
//! Everything a session needs at runtime is carried in explicit values
//! ([`SessionTimings`], and the server's own config) that are built once at
//! startup and handed down.

use std::time::Duration;

/// Connection-level defaults.
pub struct TransportConfig;

impl TransportConfig {
    /// Time allowed to write a message to the peer.
    pub const WRITE_WAIT: Duration = Duration::from_secs(10);
    /// Time allowed to read the next pong message from the peer.
    pub const PONG_WAIT: Duration = Duration::from_secs(60);
    /// Send pings to peer with this period. Must be less than `PONG_WAIT`.
    pub const PING_PERIOD: Duration = Duration::from_secs(54);
    /// Maximum message size allowed from peer.
    pub const MAX_MESSAGE_SIZE: usize = 8192;
    /// Longest stdout or stderr line relayed; longer lines are dropped.
    pub const MAX_LINE_LENGTH: usize = 64 * 1024;
    /// Maximum size of one uploaded file payload, accepted before the program starts.
    pub const MAX_UPLOAD_SIZE: usize = 64 << 20;
    /// Time to wait for the peer's close acknowledgment before force closing (server).
    pub const SERVER_CLOSE_GRACE: Duration = Duration::from_secs(10);
    /// Time to wait for the peer's close acknowledgment before giving up (client).
    pub const CLIENT_CLOSE_GRACE: Duration = Duration::from_secs(1);
    /// Close reason sent when the process closed its stdout.
    pub const STDOUT_CLOSED_REASON: &'static str = "done reading STDOUT";
    /// Close reason sent when the client is interrupted locally.
    pub const INTERRUPTED_REASON: &'static str = "interrupted";
    /// Default listen address of the server.
    pub const DEFAULT_ADDR: &'static str = "127.0.0.1:8080";
}

/// Process supervision defaults.
pub struct ProcessConfig;

impl ProcessConfig {
    /// Wait after the interrupt signal before a kill is sent.
    pub const KILL_GRACE: Duration = Duration::from_secs(1);
    /// Prefix of per-session temporary directories.
    pub const TEMP_DIR_PREFIX: &'static str = "resource-proxy-";
    /// Text sent to the peer when the session fails internally.
    pub const INTERNAL_ERROR_MESSAGE: &'static str = "Internal server error.";
}

/// Payload codec defaults.
pub struct CodecConfig;

impl CodecConfig {
    /// Part header carrying the file path relative to the payload root.
    pub const FILENAME_HEADER: &'static str = "X-Concourse-Filename";
    /// Content type of every part.
    pub const PART_CONTENT_TYPE: &'static str = "application/octet-stream";
    /// Number of random bytes in a generated boundary (hex encoded).
    pub const BOUNDARY_BYTES: usize = 15;
}

/// Timing and size limits applied to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimings {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub close_grace: Duration,
    pub kill_grace: Duration,
    pub max_message_size: usize,
    pub max_upload_size: usize,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            write_wait: TransportConfig::WRITE_WAIT,
            pong_wait: TransportConfig::PONG_WAIT,
            ping_period: TransportConfig::PING_PERIOD,
            close_grace: TransportConfig::SERVER_CLOSE_GRACE,
            kill_grace: ProcessConfig::KILL_GRACE,
            max_message_size: TransportConfig::MAX_MESSAGE_SIZE,
            max_upload_size: TransportConfig::MAX_UPLOAD_SIZE,
        }
    }
}

impl SessionTimings {
    /// Set the pong wait and derive the ping period (9/10 of it).
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }

    /// Set the close grace period.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Largest message the transport must accept for `action`.
    pub fn transport_limit(&self, action: ActionKind) -> usize {
        if action.receives_files() {
            self.max_upload_size.max(self.max_message_size)
        } else {
            self.max_message_size
        }
    }

    /// Set the kill grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// The three resource actions a proxy can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Check,
    In,
    Out,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Check, ActionKind::In, ActionKind::Out];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Check => "check",
            ActionKind::In => "in",
            ActionKind::Out => "out",
        }
    }

    /// HTTP path the server exposes for this action.
    pub fn path(&self) -> &'static str {
        match self {
            ActionKind::Check => "/check",
            ActionKind::In => "/in",
            ActionKind::Out => "/out",
        }
    }

    /// Whether the program gets a working directory as its only argument.
    pub fn takes_directory(&self) -> bool {
        !matches!(self, ActionKind::Check)
    }

    /// Whether the session sends the working directory back after stdout ends.
    pub fn sends_files(&self) -> bool {
        matches!(self, ActionKind::In)
    }

    /// Whether the session materializes uploaded files before starting the program.
    pub fn receives_files(&self) -> bool {
        matches!(self, ActionKind::Out)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "check" => Some(ActionKind::Check),
            "in" => Some(ActionKind::In),
            "out" => Some(ActionKind::Out),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_roundtrip() {
        for action in ActionKind::ALL {
            let parsed = ActionKind::from_str(action.as_str()).expect("Should parse");
            assert_eq!(action, parsed);
            assert_eq!(action.path(), format!("/{}", action));
        }
    }

    #[test]
    fn test_file_direction_is_exclusive() {
        for action in ActionKind::ALL {
            assert!(!(action.sends_files() && action.receives_files()));
        }
        assert!(!ActionKind::Check.takes_directory());
    }

    #[test]
    fn test_ping_period_is_below_pong_wait() {
        assert!(TransportConfig::PING_PERIOD < TransportConfig::PONG_WAIT);

        let timings = SessionTimings::default().with_pong_wait(Duration::from_secs(10));
        assert_eq!(timings.ping_period, Duration::from_secs(9));
    }

    #[test]
    fn test_transport_limit_widens_only_for_uploads() {
        let timings = SessionTimings::default();
        assert_eq!(timings.transport_limit(ActionKind::Check), 8192);
        assert_eq!(timings.transport_limit(ActionKind::In), 8192);
        assert_eq!(
            timings.transport_limit(ActionKind::Out),
            TransportConfig::MAX_UPLOAD_SIZE
        );
    }
}
