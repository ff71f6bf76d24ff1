//! Connection driver (C8, spec §4.5/§1): owns the per-connection state and
//! drives the transport's read/write loop, dispatching inbound frames to
//! the stream table (C5) or straight into the responder (C7).
//!
//! Lifecycle is the usual `Idle -> Connecting -> Open -> Closing -> Closed`
//! state machine with an idempotent `close()`, driven by a single spawned
//! task that interleaves draining the send multiplexer with reading and
//! dispatching inbound frames from an async [`Transport`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as PlMutex;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::error::{RSocketError, Result};
use crate::error_sink::{ErrorSink, TracingErrorSink};
use crate::frame::Frame;
use crate::handler::SharedRSocket;
use crate::lease::{LeaseHandler, NoLease};
use crate::payload::Payload;
use crate::requester::RequesterClient;
use crate::responder;
use crate::send_mux::SendMultiplexer;
use crate::stream_id::Role;
use crate::stream_table::StreamTable;
use crate::transport::Transport;

/// Connection state machine states (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// A single RSocket connection: the send multiplexer, stream table,
/// Requester handle, and Responder handler installed for it.
pub struct Connection {
    state: Arc<PlMutex<ConnectionState>>,
    streams: Arc<StreamTable>,
    send_mux: Arc<SendMultiplexer>,
    requester: RequesterClient,
    responder_handler: SharedRSocket,
    lease: Arc<dyn LeaseHandler>,
    error_sink: Arc<dyn ErrorSink>,
    mtu: usize,
    setup_seen: Arc<AtomicBool>,
    tasks: PlMutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(
        role: Role,
        responder_handler: SharedRSocket,
        config: ConnectionConfig,
        lease: Arc<dyn LeaseHandler>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let streams = Arc::new(StreamTable::new());
        let send_mux = Arc::new(SendMultiplexer::new());
        let requester = RequesterClient::new(
            role,
            streams.clone(),
            send_mux.clone(),
            lease.clone(),
            &config,
        );
        Self {
            state: Arc::new(PlMutex::new(ConnectionState::Idle)),
            streams,
            send_mux,
            requester,
            responder_handler,
            lease,
            error_sink,
            mtu: config.mtu,
            setup_seen: Arc::new(AtomicBool::new(false)),
            tasks: PlMutex::new(Vec::new()),
        }
    }

    /// A connection with no lease enforcement and `tracing`-backed error
    /// reporting — the behavior spec §6 prescribes "absent an
    /// application-supplied handler."
    pub fn with_defaults(role: Role, responder_handler: SharedRSocket, config: ConnectionConfig) -> Self {
        Self::new(
            role,
            responder_handler,
            config,
            Arc::new(NoLease),
            Arc::new(TracingErrorSink),
        )
    }

    /// A cheaply cloneable handle the application uses to issue requests to
    /// the peer (spec §6: the Requester-side [`RSocket`](crate::handler::RSocket)).
    pub fn requester(&self) -> RequesterClient {
        self.requester.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Begin a client-side handshake (spec §4.5: `Idle -> Connecting`).
    pub fn connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Idle => {
                *state = ConnectionState::Connecting;
                Ok(())
            }
            other => Err(RSocketError::InvalidStateTransition {
                from: other.to_string(),
                to: ConnectionState::Connecting.to_string(),
            }),
        }
    }

    /// Complete the handshake (spec §4.5: `Idle|Connecting -> Open`). SETUP
    /// negotiation itself is out of scope (spec §1 Non-goals) — this just
    /// records that the peer is ready to exchange stream frames.
    pub fn accept(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Idle | ConnectionState::Connecting => {
                *state = ConnectionState::Open;
                Ok(())
            }
            other => Err(RSocketError::InvalidStateTransition {
                from: other.to_string(),
                to: ConnectionState::Open.to_string(),
            }),
        }
    }

    /// Start driving `transport`: spawns the single task that interleaves
    /// writing queued outbound frames with reading and dispatching inbound
    /// ones. Requires the connection to already be `Open`.
    pub fn run<T>(&self, transport: T) -> Result<()>
    where
        T: Transport + 'static,
    {
        {
            let state = self.state.lock();
            if *state != ConnectionState::Open {
                return Err(RSocketError::InvalidStateTransition {
                    from: state.to_string(),
                    to: "running".to_string(),
                });
            }
        }

        let send_mux = self.send_mux.clone();
        let streams = self.streams.clone();
        let handler = self.responder_handler.clone();
        let lease = self.lease.clone();
        let error_sink = self.error_sink.clone();
        let state = self.state.clone();
        let mtu = self.mtu;
        let setup_seen = self.setup_seen.clone();

        let task = tokio::spawn(drive(
            transport, send_mux, streams, handler, lease, error_sink, state, mtu, setup_seen,
        ));
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Terminate the connection (spec §4.5 termination): idempotent, cancels
    /// all sending subscriptions, fails every channel processor, and closes
    /// the send multiplexer so the running `drive` task winds down.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
            return Ok(());
        }
        *state = ConnectionState::Closed;
        drop(state);
        terminate(&self.send_mux, &self.streams);
        Ok(())
    }
}

/// Tear down the wire-facing state shared by `close()` and the `drive` task's
/// own exit path, so both a caller-initiated close and a transport failure
/// reach the same end state.
fn terminate(send_mux: &SendMultiplexer, streams: &StreamTable) {
    send_mux.close();
    for sink in streams.drain() {
        sink.on_connection_error(&RSocketError::ConnectionClosed);
    }
}

/// The connection's single IO task: interleaves draining `send_mux` into the
/// transport with reading and dispatching inbound frames, until either side
/// closes.
async fn drive<T: Transport>(
    mut transport: T,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
    handler: SharedRSocket,
    lease: Arc<dyn LeaseHandler>,
    error_sink: Arc<dyn ErrorSink>,
    state: Arc<PlMutex<ConnectionState>>,
    mtu: usize,
    setup_seen: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            frame = send_mux.dequeue() => {
                match frame {
                    Some(bytes) => {
                        if transport.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            received = transport.recv() => {
                match received {
                    Ok(Some(bytes)) => match Frame::decode(&bytes) {
                        Ok(frame) => {
                            let should_terminate = dispatch_frame(
                                frame, &handler, &send_mux, &streams, &lease, &error_sink, mtu,
                                &setup_seen,
                            );
                            if should_terminate {
                                break;
                            }
                        }
                        Err(error) => error_sink.on_error(&error),
                    },
                    Ok(None) => break,
                    Err(error) => {
                        error_sink.on_error(&error);
                        break;
                    }
                }
            }
        }
    }

    *state.lock() = ConnectionState::Closed;
    terminate(&send_mux, &streams);
}

/// Route one decoded inbound frame (spec §4.5 dispatch): stream-scoped
/// frames with no existing table entry are silently dropped (spec §7.5: a
/// frame on an unknown, non-REQUEST_* stream id is a protocol violation the
/// peer caused, not one this side should crash over). Returns `true` when
/// the frame represents a connection-level protocol violation and the
/// caller's drive loop must terminate the connection.
fn dispatch_frame(
    frame: Frame,
    handler: &SharedRSocket,
    send_mux: &Arc<SendMultiplexer>,
    streams: &Arc<StreamTable>,
    lease: &Arc<dyn LeaseHandler>,
    error_sink: &Arc<dyn ErrorSink>,
    mtu: usize,
    setup_seen: &Arc<AtomicBool>,
) -> bool {
    match frame {
        Frame::RequestFnf { metadata, data, .. } => {
            responder::handle_request_fnf(handler.clone(), Payload::new(data, metadata));
        }
        Frame::RequestResponse {
            stream_id,
            metadata,
            data,
        } => {
            if let Err(error) = responder::handle_request_response(
                handler.clone(),
                send_mux.clone(),
                streams.clone(),
                stream_id,
                mtu,
                Payload::new(data, metadata),
            ) {
                responder::send_error(send_mux, stream_id, &error);
                error_sink.on_error(&error);
            }
        }
        Frame::RequestStream {
            stream_id,
            initial_request_n,
            metadata,
            data,
        } => {
            if let Err(error) = responder::handle_request_stream(
                handler.clone(),
                send_mux.clone(),
                streams.clone(),
                stream_id,
                initial_request_n,
                mtu,
                Payload::new(data, metadata),
            ) {
                responder::send_error(send_mux, stream_id, &error);
                error_sink.on_error(&error);
            }
        }
        Frame::RequestChannel {
            stream_id,
            initial_request_n,
            complete,
            metadata,
            data,
        } => {
            if let Err(error) = responder::handle_request_channel(
                handler.clone(),
                send_mux.clone(),
                streams.clone(),
                stream_id,
                initial_request_n,
                mtu,
                complete,
                Payload::new(data, metadata),
            ) {
                responder::send_error(send_mux, stream_id, &error);
                error_sink.on_error(&error);
            }
        }
        Frame::RequestN { stream_id, n } => {
            if let Some(sink) = streams.get(stream_id) {
                sink.on_request_n(n);
            } else {
                tracing::debug!(stream_id, n, "REQUEST_N for unknown stream id");
            }
        }
        Frame::Cancel { stream_id } => {
            if let Some(sink) = streams.get(stream_id) {
                sink.on_cancel();
            }
        }
        Frame::Payload {
            stream_id,
            next,
            complete,
            metadata,
            data,
        } => {
            if let Some(sink) = streams.get(stream_id) {
                sink.on_payload(next, complete, metadata, data);
            }
        }
        Frame::Error {
            stream_id,
            error_code,
            message,
        } => {
            if stream_id == 0 {
                error_sink.on_error(&RSocketError::from_wire(error_code, message));
            } else if let Some(sink) = streams.get(stream_id) {
                sink.on_error(error_code, message);
            }
        }
        Frame::MetadataPush { metadata } => {
            let handler = handler.clone();
            tokio::spawn(async move {
                let _ = handler.metadata_push(metadata).await;
            });
        }
        Frame::Lease {
            time_to_live_ms,
            number_of_requests,
            ..
        } => {
            tracing::debug!(time_to_live_ms, number_of_requests, "lease received");
            lease.on_lease(time_to_live_ms, number_of_requests);
        }
        Frame::Setup { .. } => {
            if setup_seen.swap(true, Ordering::SeqCst) {
                let error = RSocketError::ConnectionProtocolViolation(
                    "SETUP received after the connection was already established".to_string(),
                );
                tracing::warn!(error = %error, "terminating connection");
                send_mux.enqueue_priority(
                    Frame::Error {
                        stream_id: 0,
                        error_code: crate::error::error_code::CONNECTION_ERROR,
                        message: error.to_string(),
                    }
                    .encode(),
                );
                error_sink.on_error(&error);
                return true;
            }
        }
        Frame::KeepAlive { .. } | Frame::Resume { .. } | Frame::ResumeOk { .. } | Frame::Ext { .. } => {
            // Resume/extension frames are out of scope for this engine
            // (spec §1 Non-goals); a layer above decides what to do with
            // them before frames reach this dispatch loop.
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RSocket;
    use crate::transport::InMemoryTransport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use crate::subscriber::Publisher;

    struct EchoHandler;

    #[async_trait]
    impl RSocket for EchoHandler {
        async fn fire_and_forget(&self, _payload: Payload) -> Result<()> {
            Ok(())
        }
        async fn request_response(&self, payload: Payload) -> Result<Payload> {
            Ok(payload)
        }
        fn request_stream(&self, _payload: Payload) -> Box<dyn Publisher> {
            Box::new(responder::RejectedPublisher)
        }
        fn request_channel(&self, _inbound: Box<dyn Publisher>) -> Box<dyn Publisher> {
            Box::new(responder::RejectedPublisher)
        }
        async fn metadata_push(&self, _metadata: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_response_round_trips_over_two_driven_connections() {
        let (transport_a, transport_b) = InMemoryTransport::pair();

        let client = Connection::with_defaults(
            Role::Client,
            Arc::new(crate::handler::RejectingRSocket),
            ConnectionConfig::default(),
        );
        client.accept().unwrap();
        client.run(transport_a).unwrap();

        let server = Connection::with_defaults(
            Role::Server,
            Arc::new(EchoHandler),
            ConnectionConfig::default(),
        );
        server.accept().unwrap();
        server.run(transport_b).unwrap();

        let response = client
            .requester()
            .request_response(Payload::from_data(&b"ping"[..]))
            .await
            .unwrap();
        assert_eq!(response.data, Bytes::from_static(b"ping"));
    }

    #[test]
    fn connect_accept_close_lifecycle() {
        let conn = Connection::with_defaults(
            Role::Client,
            Arc::new(crate::handler::RejectingRSocket),
            ConnectionConfig::default(),
        );
        assert_eq!(conn.state(), ConnectionState::Idle);
        conn.connect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        conn.accept().unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close().unwrap(); // idempotent
    }

    #[test]
    fn cannot_run_before_open() {
        let conn = Connection::with_defaults(
            Role::Client,
            Arc::new(crate::handler::RejectingRSocket),
            ConnectionConfig::default(),
        );
        let (transport, _peer) = InMemoryTransport::pair();
        assert!(conn.run(transport).is_err());
    }

    #[tokio::test]
    async fn duplicate_stream_id_sends_wire_error_instead_of_dropping_silently() {
        let handler: crate::handler::SharedRSocket = Arc::new(EchoHandler);
        let send_mux = Arc::new(SendMultiplexer::new());
        let streams = Arc::new(crate::stream_table::StreamTable::new());
        let lease: Arc<dyn LeaseHandler> = Arc::new(crate::lease::NoLease);
        let error_sink: Arc<dyn ErrorSink> = Arc::new(crate::error_sink::TracingErrorSink);
        let setup_seen = Arc::new(AtomicBool::new(false));

        // Occupy stream id 7 so the inbound REQUEST_RESPONSE below collides.
        struct StubEntry;
        impl crate::stream_table::InboundSink for StubEntry {
            fn on_payload(&self, _next: bool, _complete: bool, _metadata: Option<Bytes>, _data: Option<Bytes>) {}
            fn on_error(&self, _code: u32, _message: String) {}
            fn on_cancel(&self) {}
            fn on_request_n(&self, _n: i64) {}
            fn on_connection_error(&self, _error: &RSocketError) {}
        }
        streams.insert(7, Arc::new(StubEntry)).unwrap();

        let terminate = dispatch_frame(
            Frame::RequestResponse {
                stream_id: 7,
                metadata: None,
                data: Bytes::from_static(b"ping"),
            },
            &handler,
            &send_mux,
            &streams,
            &lease,
            &error_sink,
            0,
            &setup_seen,
        );
        assert!(!terminate);

        let frame = send_mux.dequeue().await.unwrap();
        match Frame::decode(&frame).unwrap() {
            Frame::Error { stream_id, .. } => assert_eq!(stream_id, 7),
            other => panic!("expected an ERROR frame on the wire, got: {other:?}"),
        }
    }
}
