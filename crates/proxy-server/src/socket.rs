//! axum WebSocket adapters for the session's frame seams.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use proxy_core::transport::NO_STATUS_RECEIVED;
use proxy_core::{Frame, FrameSink, FrameSource, ProxyError, Result};

pub struct AxumSink {
    sink: SplitSink<WebSocket, Message>,
}

pub struct AxumSource {
    stream: SplitStream<WebSocket>,
}

/// Split an upgraded socket into frame halves.
pub fn split(socket: WebSocket) -> (AxumSink, AxumSource) {
    let (sink, stream) = socket.split();
    (AxumSink { sink }, AxumSource { stream })
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data.into()),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(Some(close)) => Frame::Close {
            code: close.code,
            reason: close.reason.into_owned(),
        },
        Message::Close(None) => Frame::Close {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        },
    }
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.sink
            .send(to_message(frame))
            .await
            .map_err(ProxyError::transport)
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.map_err(ProxyError::transport)
    }
}

#[async_trait]
impl FrameSource for AxumSource {
    async fn recv(&mut self) -> Option<Result<Frame>> {
        match self.stream.next().await? {
            Ok(message) => Some(Ok(from_message(message))),
            Err(e) => Some(Err(ProxyError::transport(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_conversion() {
        let message = to_message(Frame::normal_close("done reading STDOUT"));
        assert_eq!(
            from_message(message),
            Frame::normal_close("done reading STDOUT")
        );
        assert_eq!(
            from_message(Message::Close(None)),
            Frame::Close {
                code: NO_STATUS_RECEIVED,
                reason: String::new()
            }
        );
    }

    #[test]
    fn test_data_frames_keep_payload() {
        assert_eq!(
            from_message(to_message(Frame::Text("line".into()))),
            Frame::Text("line".into())
        );
        assert_eq!(
            from_message(Message::Binary(vec![0, 1, 2])),
            Frame::Binary(vec![0u8, 1, 2].into())
        );
    }
}
