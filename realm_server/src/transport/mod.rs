//! Frame transport seam.
//!
//! Sessions talk to the network through two halves:
//! - [`FrameStream`]: owned by the session's inbound task.
//! - [`FrameSink`]: owned by the session and only written from the flush tick.
//!
//! The production implementation is a split WebSocket ([`websocket`]). Tests
//! drive sessions through in-process channels ([`memory`]).

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod websocket;

/// What the inbound half can yield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame carrying one JSON packet.
    Text(String),
    /// A control frame (ping/pong). Only proves the peer is alive.
    Liveness,
    /// The peer closed the connection.
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("inbound message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
    #[error("connection closed")]
    Closed,
}

#[async_trait]
pub trait FrameStream: Send {
    /// Waits for the next frame. Cancel-safe; callers wrap it in a timeout.
    async fn recv_frame(&mut self) -> Result<InboundFrame, TransportError>;
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Transport-level ping, sent alongside the JSON keepalive.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Sends a close frame and shuts the write half down.
    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError>;
}
