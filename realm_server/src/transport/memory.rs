//! In-process transport for tests and tooling.
//!
//! [`pair`] returns the two halves a session owns plus a [`MemoryPeer`] that
//! plays the remote client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use realm_shared::net::{decode_server_message, encode_client_message, ClientMessage, ServerMessage};
use tokio::sync::mpsc;

use super::{FrameSink, FrameStream, InboundFrame, TransportError};

/// Everything the server wrote, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

pub struct MemorySink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    closed: bool,
}

pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Remote end of a memory connection.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<InboundFrame>,
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

pub fn pair() -> (MemorySink, MemoryStream, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        MemorySink {
            tx: out_tx,
            closed: false,
        },
        MemoryStream { rx: in_rx },
        MemoryPeer {
            tx: in_tx,
            rx: out_rx,
        },
    )
}

impl MemorySink {
    fn push(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(OutboundFrame::Text(text))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(OutboundFrame::Ping)
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError> {
        self.push(OutboundFrame::Close { code, reason })?;
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv_frame(&mut self) -> Result<InboundFrame, TransportError> {
        Ok(self.rx.recv().await.unwrap_or(InboundFrame::Closed))
    }
}

impl MemoryPeer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(InboundFrame::Text(text.into()));
    }

    pub fn send_message(&self, msg: &ClientMessage) -> anyhow::Result<()> {
        self.send_text(encode_client_message(msg)?);
        Ok(())
    }

    /// Answers a keepalive, like a browser answering a ping.
    pub fn send_pong(&self) {
        let _ = self.tx.send(InboundFrame::Liveness);
    }

    pub fn hang_up(&self) {
        let _ = self.tx.send(InboundFrame::Closed);
    }

    /// Next raw frame, or `None` once the server dropped the sink.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.rx.try_recv().ok()
    }

    /// Next JSON message, skipping transport pings. Fails on close or timeout.
    pub async fn recv_message(&mut self, within: Duration) -> anyhow::Result<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(within, self.rx.recv())
                .await
                .context("timed out waiting for server message")?
                .context("server dropped the connection")?;
            match frame {
                OutboundFrame::Text(text) => return decode_server_message(&text),
                OutboundFrame::Ping => continue,
                OutboundFrame::Close { code, reason } => {
                    anyhow::bail!("connection closed with {code}: {reason}")
                }
            }
        }
    }

    /// Skips messages until one matches `pred`.
    pub async fn recv_until(
        &mut self,
        within: Duration,
        mut pred: impl FnMut(&ServerMessage) -> bool,
    ) -> anyhow::Result<ServerMessage> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = self.recv_message(left).await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_refuses_writes_after_close() {
        let (mut sink, _stream, mut peer) = pair();
        sink.send_text("a".into()).await.unwrap();
        sink.close(1000, "bye".into()).await.unwrap();
        assert!(matches!(
            sink.send_text("b".into()).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(peer.recv().await, Some(OutboundFrame::Text("a".into())));
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close {
                code: 1000,
                reason: "bye".into()
            })
        );
    }

    #[tokio::test]
    async fn dropped_peer_reads_as_closed() {
        let (_sink, mut stream, peer) = pair();
        peer.send_pong();
        drop(peer);
        assert_eq!(stream.recv_frame().await.unwrap(), InboundFrame::Liveness);
        assert_eq!(stream.recv_frame().await.unwrap(), InboundFrame::Closed);
    }
}
