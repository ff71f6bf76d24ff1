//! Transport seam (spec §1 Non-goals: "transport framing/negotiation is out
//! of scope; the engine operates over an abstract ordered, reliable,
//! message-preserving channel").
//!
//! A minimal async send/receive pair the rest of the engine programs
//! against, without caring whether the other end is a TCP socket, a
//! WebSocket, or (as in the in-memory implementation below and in the
//! integration tests) a same-process duplex channel.
//!
//! A transport carries whole encoded frames, one per `send`/`recv` — framing
//! a byte-stream transport (e.g. prefixing each frame with its 24-bit
//! length) is that transport implementation's concern, not the engine's.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{RSocketError, Result};

/// An ordered, reliable, message-preserving channel carrying encoded frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded frame. Must not interleave partial frames from
    /// concurrent callers; implementations that wrap a single underlying
    /// socket typically serialize this internally.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Receive the next encoded frame, or `None` if the peer closed the
    /// channel.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// An in-memory duplex transport pair, for tests and same-process use. Each
/// half's `send` delivers to the other half's `recv`.
pub struct InMemoryTransport {
    sender: mpsc::UnboundedSender<Bytes>,
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl InMemoryTransport {
    /// Construct a connected pair: whatever is sent on one side arrives on
    /// the other.
    pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            InMemoryTransport {
                sender: tx_a,
                receiver: rx_b,
            },
            InMemoryTransport {
                sender: tx_b,
                receiver: rx_a,
            },
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, frame: Bytes) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| RSocketError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.receiver.recv().await)
    }
}
