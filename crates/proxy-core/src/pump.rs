//! The three one-directional pumps of a session.
//!
//! - [`InboundPump`]: peer messages to the program's stdin, one line each.
//! - [`OutboundPump`]: stdout lines to the peer, then the optional result
//!   payload and the close handshake.
//! - [`DiagnosticPump`]: stderr lines to the local log.
//!
//! Each pump owns its pipe end exclusively and fires its own
//! [`CompletionSignal`] when it is done. The pumps are generic over the pipe
//! type so tests can drive them with in-memory streams.

use crate::close::CloseProtocol;
use crate::codec::encode_directory;
use crate::config::{ActionKind, TransportConfig};
use crate::error::ProxyError;
use crate::liveness::ReadDeadline;
use crate::signal::CompletionSignal;
use crate::transport::{ConnectionWriter, Frame, FrameSource};
use std::path::PathBuf;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info, warn};

/// Why the inbound pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnd {
    /// The peer sent a close frame.
    PeerClosed { code: u16, reason: String },
    /// The connection ended without a close frame.
    Disconnected,
    /// Neither data nor a pong arrived before the read deadline.
    ReadTimeout,
    /// A message exceeded the size ceiling.
    TooLarge { size: usize },
    /// The transport reported an error.
    TransportError(String),
    /// The connection was force-closed locally.
    ForceClosed,
    /// Writing to the program's stdin failed.
    StdinClosed,
}

/// Peer to stdin.
pub struct InboundPump {
    source: Box<dyn FrameSource>,
    deadline: ReadDeadline,
    max_message_size: usize,
    closed: CompletionSignal,
    done: CompletionSignal,
    pending: Option<String>,
}

impl InboundPump {
    /// `closed` is the connection's force-close signal; `done` is fired when
    /// the pump ends.
    pub fn new(
        source: Box<dyn FrameSource>,
        deadline: ReadDeadline,
        max_message_size: usize,
        closed: CompletionSignal,
        done: CompletionSignal,
    ) -> Self {
        Self {
            source,
            deadline,
            max_message_size,
            closed,
            done,
            pending: None,
        }
    }

    /// Deliver `line` to stdin before reading from the connection.
    pub fn with_pending_line(mut self, line: Option<String>) -> Self {
        self.pending = line;
        self
    }

    /// Run until the connection ends, then close stdin and fire `done`.
    pub async fn run<W>(mut self, mut stdin: W) -> InboundEnd
    where
        W: AsyncWrite + Unpin + Send,
    {
        let end = self.pump(&mut stdin).await;

        if let Err(e) = stdin.shutdown().await {
            debug!("Closing stdin: {}", e);
        }
        drop(stdin);

        debug!("Inbound pump ended: {:?}", end);
        self.done.fire();
        end
    }

    async fn pump<W>(&mut self, stdin: &mut W) -> InboundEnd
    where
        W: AsyncWrite + Unpin + Send,
    {
        if let Some(line) = self.pending.take() {
            if write_line(stdin, &line).await.is_err() {
                return InboundEnd::StdinClosed;
            }
        }

        loop {
            let frame = tokio::select! {
                _ = self.closed.wait() => return InboundEnd::ForceClosed,
                received = tokio::time::timeout_at(self.deadline.instant(), self.source.recv()) => {
                    match received {
                        Err(_) => return InboundEnd::ReadTimeout,
                        Ok(None) => return InboundEnd::Disconnected,
                        Ok(Some(Err(e))) => return InboundEnd::TransportError(e.to_string()),
                        Ok(Some(Ok(frame))) => frame,
                    }
                }
            };

            let size = frame.data_len();
            if size > self.max_message_size {
                let err = ProxyError::MessageTooLarge {
                    size,
                    limit: self.max_message_size,
                };
                warn!("Dropping connection: {}", err);
                return InboundEnd::TooLarge { size };
            }

            match frame {
                Frame::Text(line) => {
                    debug!("< {}", line);
                    if let Err(e) = write_line(stdin, &line).await {
                        debug!("Writing to stdin: {}", e);
                        return InboundEnd::StdinClosed;
                    }
                }
                Frame::Binary(data) => {
                    debug!("Ignoring {} byte binary message", data.len());
                }
                Frame::Pong(_) => self.deadline.renew(),
                Frame::Ping(_) => {}
                Frame::Close { code, reason } => {
                    return InboundEnd::PeerClosed { code, reason };
                }
            }
        }
    }
}

async fn write_line<W>(stdin: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut message = Vec::with_capacity(line.len() + 1);
    message.extend_from_slice(line.as_bytes());
    message.push(b'\n');
    stdin.write_all(&message).await?;
    stdin.flush().await
}

/// Summary of an outbound pump run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundReport {
    pub lines_sent: usize,
    /// Lines longer than the line limit, not relayed.
    pub lines_dropped: usize,
    pub payload_sent: bool,
    pub write_failed: bool,
    pub close_acknowledged: bool,
}

/// Stdout to peer.
pub struct OutboundPump {
    writer: ConnectionWriter,
    done: CompletionSignal,
    result_dir: Option<PathBuf>,
    close: CloseProtocol,
}

impl OutboundPump {
    pub fn new(writer: ConnectionWriter, done: CompletionSignal, close: CloseProtocol) -> Self {
        Self {
            writer,
            done,
            result_dir: None,
            close,
        }
    }

    /// Encode and send `dir` once stdout has ended.
    pub fn with_result_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.result_dir = dir;
        self
    }

    pub async fn run<R>(mut self, stdout: R) -> OutboundReport
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut report = OutboundReport::default();
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();

        loop {
            match read_line_capped(&mut reader, &mut line, TransportConfig::MAX_LINE_LENGTH).await {
                Ok(LineRead::Eof) => break,
                Ok(LineRead::TooLong(size)) => {
                    warn!("Dropping {} byte stdout line", size);
                    report.lines_dropped += 1;
                }
                Ok(LineRead::Line) => {
                    let text = String::from_utf8_lossy(trim_line_ending(&line)).into_owned();
                    debug!("> {}", text);

                    if let Err(e) = self.writer.send_text(text).await {
                        warn!("E: {}", e);
                        self.writer.force_close().await;
                        report.write_failed = true;
                        break;
                    }
                    report.lines_sent += 1;
                }
                Err(e) => {
                    warn!("scan: {}", e);
                    break;
                }
            }
        }
        drop(reader);

        self.done.fire();

        if report.write_failed {
            return report;
        }

        if let Some(dir) = self.result_dir.take() {
            report.payload_sent = self.send_files(dir).await;
        }

        report.close_acknowledged = self.close.close(TransportConfig::STDOUT_CLOSED_REASON).await;
        report
    }

    async fn send_files(&self, dir: PathBuf) -> bool {
        let encoded = tokio::task::spawn_blocking(move || encode_directory(&dir)).await;
        let payload = match encoded {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("Encoding result directory: {}", e);
                return false;
            }
            Err(e) => {
                warn!("Encoding task failed: {}", e);
                return false;
            }
        };

        info!("Sending {} byte file payload", payload.len());
        match self.writer.send_binary(payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Sending file payload: {}", e);
                false
            }
        }
    }
}

/// Result of one capped line read.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// `line` holds the next line, with its line ending if it had one.
    Line,
    /// The line exceeded the limit and was skipped; carries its length.
    TooLong(usize),
    Eof,
}

/// Read the next line into `line`, buffering at most `limit` bytes of it.
///
/// A longer line is consumed up to and including its newline and reported
/// as [`LineRead::TooLong`], so the pipe keeps draining either way.
async fn read_line_capped<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', line)
        .await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if line.ends_with(b"\n") || read < limit {
        return Ok(LineRead::Line);
    }

    // Exactly `limit` bytes, followed by the line end or the end of stream.
    let next = reader.fill_buf().await?.first().copied();
    match next {
        None => return Ok(LineRead::Line),
        Some(b'\n') => {
            reader.consume(1);
            line.push(b'\n');
            return Ok(LineRead::Line);
        }
        Some(_) => {}
    }

    let mut skipped = read;
    loop {
        let (used, found) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                break;
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(end) => (end + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(used);
        skipped += used;
        if found {
            break;
        }
    }

    line.clear();
    Ok(LineRead::TooLong(skipped))
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Stderr to the local log.
pub struct DiagnosticPump {
    action: ActionKind,
    done: CompletionSignal,
}

impl DiagnosticPump {
    pub fn new(action: ActionKind, done: CompletionSignal) -> Self {
        Self { action, done }
    }

    /// Log every stderr line until stderr closes; returns the number of lines seen.
    ///
    /// Lines are decoded lossily, so output that is not UTF-8 never stops the
    /// pump while the program may still write.
    pub async fn run<R>(self, stderr: R) -> usize
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        let mut count = 0;

        loop {
            match read_line_capped(&mut reader, &mut line, TransportConfig::MAX_LINE_LENGTH).await {
                Ok(LineRead::Eof) => break,
                Ok(LineRead::Line) => {
                    let text = String::from_utf8_lossy(trim_line_ending(&line));
                    info!(action = %self.action, "E {}", text);
                    count += 1;
                }
                Ok(LineRead::TooLong(size)) => {
                    warn!(action = %self.action, "Dropping {} byte stderr line", size);
                    count += 1;
                }
                Err(e) => {
                    warn!("scan: {}", e);
                    break;
                }
            }
        }

        self.done.fire();
        count
    }
}
