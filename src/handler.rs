//! The `RSocket` contract (spec §6): the single interface both sides of a
//! connection present to each other. An application supplies an
//! implementation to act as **Responder** (handling the peer's requests);
//! the connection driver hands back its own implementation to act as
//! **Requester** (issuing requests to the peer) — the same shape serves
//! both roles, matching the protocol's stated symmetry (spec §1).
//!
//! A role's capabilities are named as a trait at the module boundary,
//! widened here to the four RSocket interaction kinds plus metadata push.
//! Uses `async_trait` for a dyn-compatible trait with async methods, since
//! `fire_and_forget`/`request_response`/`metadata_push` do real asynchronous
//! work before resolving.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::Result;
use crate::payload::Payload;
use crate::subscriber::Publisher;

/// Implemented by the application to service the peer's requests, and by
/// the connection engine itself to let the application issue requests to
/// the peer.
#[async_trait]
pub trait RSocket: Send + Sync {
    /// Fire-and-forget: a single request, no response (spec §6 fnf). The
    /// returned future resolves once the request has been accepted locally
    /// (validated and, for a Requester-side impl, handed to the transport);
    /// it carries no information about whether the peer processed it.
    async fn fire_and_forget(&self, payload: Payload) -> Result<()>;

    /// Request/response: one request, exactly one response payload on
    /// success (spec §6 request_response). A response that carries no
    /// application data is still `Ok(Payload)` with empty `data` — only a
    /// failure is `Err`.
    async fn request_response(&self, payload: Payload) -> Result<Payload>;

    /// Request/stream: one request, any number of response payloads (spec §6
    /// request_stream). Returns a lazy producer: nothing happens until the
    /// caller subscribes and requests demand.
    fn request_stream(&self, payload: Payload) -> Box<dyn Publisher>;

    /// Request/channel: bidirectional streams of payloads (spec §6
    /// request_channel). `inbound` is the peer's stream of payloads to this
    /// side; the returned `Publisher` is this side's stream of payloads back
    /// to the peer.
    fn request_channel(&self, inbound: Box<dyn Publisher>) -> Box<dyn Publisher>;

    /// Metadata push: connection-scoped, no stream id, no response (spec §6
    /// metadata_push).
    async fn metadata_push(&self, metadata: Bytes) -> Result<()>;
}

/// An [`RSocket`] that rejects every interaction. Used as the default
/// Responder handler when an application only wants to act as a pure
/// Requester.
pub struct RejectingRSocket;

#[async_trait]
impl RSocket for RejectingRSocket {
    async fn fire_and_forget(&self, _payload: Payload) -> Result<()> {
        Ok(())
    }

    async fn request_response(&self, _payload: Payload) -> Result<Payload> {
        Err(crate::error::RSocketError::Rejected(
            "no responder handler installed".to_string(),
        ))
    }

    fn request_stream(&self, _payload: Payload) -> Box<dyn Publisher> {
        Box::new(crate::responder::RejectedPublisher)
    }

    fn request_channel(&self, _inbound: Box<dyn Publisher>) -> Box<dyn Publisher> {
        Box::new(crate::responder::RejectedPublisher)
    }

    async fn metadata_push(&self, _metadata: Bytes) -> Result<()> {
        Ok(())
    }
}

/// Shorthand for the handler an application installs to act as Responder.
pub type SharedRSocket = Arc<dyn RSocket>;
