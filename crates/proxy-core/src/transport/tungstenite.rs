//! tokio-tungstenite adapters used by the tunnel client.

use super::{Frame, FrameSink, FrameSource, NO_STATUS_RECEIVED};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Write half of a tokio-tungstenite stream.
#[derive(Debug)]
pub struct TungsteniteSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Read half of a tokio-tungstenite stream.
#[derive(Debug)]
pub struct TungsteniteSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Split a WebSocket stream into frame halves.
pub fn split<S>(stream: WebSocketStream<S>) -> (TungsteniteSink<S>, TungsteniteSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = stream.split();
    (TungsteniteSink { sink }, TungsteniteSource { stream })
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(data) => Some(Frame::Binary(data.into())),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(close_frame) => {
            let (code, reason) = close_frame
                .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                .unwrap_or((NO_STATUS_RECEIVED, String::new()));
            Some(Frame::Close { code, reason })
        }
        // Raw frames are never produced when reading
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl<S> FrameSink for TungsteniteSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.sink.send(to_message(frame)).await.map_err(ProxyError::from)
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.map_err(ProxyError::from)
    }
}

#[async_trait]
impl<S> FrameSource for TungsteniteSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(message) => {
                    if let Some(frame) = from_message(message) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_roundtrip() {
        let message = to_message(Frame::normal_close("done"));
        assert_eq!(
            from_message(message),
            Some(Frame::Close {
                code: 1000,
                reason: "done".to_string()
            })
        );
    }

    #[test]
    fn test_close_without_frame_reports_no_status() {
        assert_eq!(
            from_message(Message::Close(None)),
            Some(Frame::Close {
                code: NO_STATUS_RECEIVED,
                reason: String::new()
            })
        );
    }

    #[tokio::test]
    async fn test_split_over_duplex_stream() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        let (client_io, server_io) = tokio::io::duplex(4096);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let (mut client_sink, _client_source) = split(client);
        let (_server_sink, mut server_source) = split(server);

        client_sink.send(Frame::Text("hello".into())).await.unwrap();
        client_sink
            .send(Frame::Binary(bytes::Bytes::from_static(b"\x00\x01")))
            .await
            .unwrap();

        assert_eq!(
            server_source.recv().await.unwrap().unwrap(),
            Frame::Text("hello".into())
        );
        assert_eq!(
            server_source.recv().await.unwrap().unwrap(),
            Frame::Binary(bytes::Bytes::from_static(b"\x00\x01"))
        );
    }
}
