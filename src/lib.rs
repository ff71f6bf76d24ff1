//! A symmetric RSocket connection engine: the per-connection state machine
//! that multiplexes fire-and-forget, request/response, request/stream,
//! request/channel and metadata-push interactions over one bidirectional
//! byte-framed transport (spec §1).
//!
//! Each side of a [`connection::Connection`] plays both roles at once: the
//! [`requester::RequesterClient`] handle issues requests to the peer, while
//! an installed [`handler::RSocket`] implementation services the peer's
//! requests as Responder. The wire format, stream-id bookkeeping, credit
//! tracking, half-closed request-channel legs and no-leak payload ownership
//! are this crate's concern; transport establishment, the setup/keepalive/
//! resume handshake, lease negotiation and application payload semantics are
//! external collaborators the connection driver consults through narrow
//! trait seams ([`transport::Transport`], [`lease::LeaseHandler`],
//! [`error_sink::ErrorSink`]).
//!
//! Start at [`connection::Connection`]; [`handler::RSocket`] is the contract
//! an application implements to act as Responder.

pub mod config;
pub mod connection;
pub mod error;
pub mod error_sink;
pub mod frame;
pub mod handler;
pub mod lease;
pub mod payload;
pub mod requester;
pub mod responder;
pub mod send_mux;
pub mod stream_id;
pub mod stream_table;
pub mod subscriber;
pub mod transport;

pub use connection::{Connection, ConnectionState};
pub use error::{RSocketError, Result};
pub use handler::RSocket;
pub use payload::Payload;
pub use stream_id::Role;
