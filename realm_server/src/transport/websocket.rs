//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        error::CapacityError,
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
        Error as WsError, Message,
    },
    WebSocketStream,
};

use super::{FrameSink, FrameStream, InboundFrame, TransportError};

type Ws = WebSocketStream<TcpStream>;

pub struct WebSocketSink {
    inner: SplitSink<Ws, Message>,
}

pub struct WebSocketFrames {
    inner: SplitStream<Ws>,
}

/// Completes the WebSocket handshake on an accepted TCP stream and splits it.
///
/// Frames and messages longer than `max_message_bytes` are refused by the
/// codec before their payload is buffered.
pub async fn accept(
    stream: TcpStream,
    max_message_bytes: usize,
) -> Result<(WebSocketSink, WebSocketFrames), TransportError> {
    let config = WebSocketConfig {
        max_message_size: Some(max_message_bytes),
        max_frame_size: Some(max_message_bytes),
        ..Default::default()
    };
    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
    let (sink, stream) = ws.split();
    Ok((WebSocketSink { inner: sink }, WebSocketFrames { inner: stream }))
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn recv_frame(&mut self) -> Result<InboundFrame, TransportError> {
        loop {
            let msg = match self.inner.next().await {
                None => return Ok(InboundFrame::Closed),
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(InboundFrame::Closed)
                }
                Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, max_size }))) => {
                    return Err(TransportError::TooLarge {
                        size,
                        limit: max_size,
                    })
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(msg)) => msg,
            };
            return match msg {
                Message::Text(text) => Ok(InboundFrame::Text(text)),
                Message::Binary(bytes) => String::from_utf8(bytes)
                    .map(InboundFrame::Text)
                    .map_err(|_| TransportError::NotUtf8),
                Message::Ping(_) | Message::Pong(_) => Ok(InboundFrame::Liveness),
                Message::Close(_) => Ok(InboundFrame::Closed),
                // Raw frames never surface when reading.
                Message::Frame(_) => continue,
            };
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.inner.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.inner.send(Message::Close(Some(frame))).await?;
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
