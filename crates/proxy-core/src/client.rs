//! Client end of the tunnel, used by the front-end programs.
//!
//! The client dials an action endpoint, optionally uploads a directory,
//! sends the forwarded request and then receives until the server closes the
//! connection. Text messages are handed to a callback as they arrive; file
//! payloads are decoded into the destination directory right away.

use crate::close::CloseProtocol;
use crate::codec::{decode_into, encode_directory, FileEntry};
use crate::config::{SessionTimings, TransportConfig};
use crate::envelope::ForwardedRequest;
use crate::error::{ProxyError, Result};
use crate::signal::CompletionSignal;
use crate::transport::{tungstenite, ConnectionWriter, Frame, FrameSink, FrameSource};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

/// Everything the client saw during one run.
#[derive(Debug, Default)]
pub struct ClientOutcome {
    pub messages: Vec<String>,
    pub files: Vec<FileEntry>,
    /// Close code and reason sent by the server, if it sent one.
    pub close: Option<(u16, String)>,
    pub interrupted: bool,
    /// After an interrupt: whether the server acknowledged the close in time.
    pub acknowledged: bool,
}

/// A connected tunnel.
pub struct TunnelClient {
    writer: ConnectionWriter,
    source: Box<dyn FrameSource>,
    close_grace: Duration,
}

impl std::fmt::Debug for TunnelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelClient")
            .field("writer", &self.writer)
            .field("close_grace", &self.close_grace)
            .finish_non_exhaustive()
    }
}

impl TunnelClient {
    /// Dial `url`, sending `token` as a bearer token when given.
    pub async fn connect(url: &Url, token: Option<&str>) -> Result<Self> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ProxyError::transport(format!("invalid WebSocket URL {}: {}", url, e)))?;

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ProxyError::InvalidEnvelope {
                    message: "token is not a valid header value".to_string(),
                }
            })?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        if url.scheme() == "wss" {
            // More than one provider may be compiled in; pin one before the first TLS dial.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        info!("Connecting to {}", url);
        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(handshake_error)?;

        let (sink, source) = tungstenite::split(stream);
        Ok(Self::from_transport(sink, source, &client_timings()))
    }

    /// Build a client over an existing transport.
    pub fn from_transport(
        sink: impl FrameSink,
        source: impl FrameSource,
        timings: &SessionTimings,
    ) -> Self {
        Self {
            writer: ConnectionWriter::new(sink, timings.write_wait),
            source: Box::new(source),
            close_grace: timings.close_grace,
        }
    }

    pub async fn send_request(&self, request: &ForwardedRequest) -> Result<()> {
        let json = request.to_json()?;
        debug!("> {}", json);
        self.writer.send_text(json).await
    }

    /// Encode `dir` and send it as one file payload.
    pub async fn send_directory(&self, dir: &Path) -> Result<usize> {
        let dir = dir.to_path_buf();
        let payload = tokio::task::spawn_blocking(move || encode_directory(&dir))
            .await
            .map_err(|e| ProxyError::Io {
                message: format!("encoding task failed: {}", e),
                path: None,
                source: None,
            })??;

        let size = payload.len();
        debug!("> {} byte file payload", size);
        self.writer.send_binary(payload).await?;
        Ok(size)
    }

    /// Receive until the server closes, or until `interrupt` completes.
    ///
    /// On interrupt a close frame is sent and the receive loop gets the close
    /// grace period to observe the server's acknowledgment.
    pub async fn run<T, F>(
        self,
        destination: Option<PathBuf>,
        mut on_text: T,
        interrupt: F,
    ) -> ClientOutcome
    where
        T: FnMut(&str) + Send,
        F: Future<Output = ()> + Send,
    {
        let TunnelClient {
            writer,
            mut source,
            close_grace,
        } = self;
        let receive_done = CompletionSignal::new();
        let mut outcome = ClientOutcome::default();
        let mut received = Received::default();

        {
            let receive = receive_loop(
                source.as_mut(),
                destination.as_deref(),
                &mut on_text,
                &mut received,
                &receive_done,
            );
            tokio::pin!(receive);
            tokio::pin!(interrupt);

            tokio::select! {
                _ = &mut receive => {}
                _ = &mut interrupt => {
                    info!("interrupt");
                    outcome.interrupted = true;

                    let mut protocol =
                        CloseProtocol::new(writer.clone(), close_grace, receive_done.clone());
                    protocol.observe_interrupt();
                    let close = protocol.close(TransportConfig::INTERRUPTED_REASON);
                    tokio::pin!(close);

                    let mut receiving = true;
                    outcome.acknowledged = loop {
                        tokio::select! {
                            acknowledged = &mut close => break acknowledged,
                            _ = &mut receive, if receiving => receiving = false,
                        }
                    };
                }
            }
        }

        writer.force_close().await;

        outcome.messages = received.messages;
        outcome.files = received.files;
        outcome.close = received.close;
        outcome
    }
}

#[derive(Default)]
struct Received {
    messages: Vec<String>,
    files: Vec<FileEntry>,
    close: Option<(u16, String)>,
}

async fn receive_loop<T>(
    source: &mut dyn FrameSource,
    destination: Option<&Path>,
    on_text: &mut T,
    received: &mut Received,
    done: &CompletionSignal,
) where
    T: FnMut(&str) + Send,
{
    while let Some(frame) = source.recv().await {
        match frame {
            Ok(Frame::Text(text)) => {
                debug!("< {}", text);
                on_text(&text);
                received.messages.push(text);
            }
            Ok(Frame::Binary(payload)) => match destination {
                Some(dest) => {
                    let dest = dest.to_path_buf();
                    match tokio::task::spawn_blocking(move || decode_into(payload, &dest)).await {
                        Ok(Ok(entries)) => {
                            info!("Received {} files", entries.len());
                            received.files.extend(entries);
                        }
                        Ok(Err(e)) => warn!("Decoding file payload: {}", e),
                        Err(e) => warn!("Decoding task failed: {}", e),
                    }
                }
                None => warn!(
                    "Ignoring {} byte file payload: no destination directory",
                    payload.len()
                ),
            },
            Ok(Frame::Close { code, reason }) => {
                debug!("Server closed the connection ({}): {}", code, reason);
                received.close = Some((code, reason));
            }
            Ok(Frame::Ping(_)) | Ok(Frame::Pong(_)) => {}
            Err(e) => {
                if !e.is_disconnect() {
                    warn!("Error: {}", e);
                }
                break;
            }
        }
    }

    done.fire();
}

fn client_timings() -> SessionTimings {
    SessionTimings::default().with_close_grace(TransportConfig::CLIENT_CLOSE_GRACE)
}

fn handshake_error(err: tokio_tungstenite::tungstenite::Error) -> ProxyError {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match err {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ProxyError::Unauthorized
        }
        WsError::Http(response) => {
            ProxyError::transport(format!("handshake rejected with {}", response.status()))
        }
        other => ProxyError::transport(format!("dial: {}", other)),
    }
}
