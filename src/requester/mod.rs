//! Requester (C6, spec §4.4/§6): the local application's view of the
//! connection — implements [`RSocket`] the same way the peer's handler
//! does, but each method now sends wire frames and waits on, or subscribes
//! to, what comes back.
//!
//! One shared, cheaply-cloned handle (stream id allocator, send
//! multiplexer, lease predicate) that every public operation goes through,
//! generalized across the four RSocket interaction shapes: cancellation is
//! expressed as a drop guard (request_response/fnf) or an explicit
//! `Subscription::cancel()` (request_stream/request_channel).

mod channel;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex as PlMutex;
use tokio::sync::oneshot;

use crate::config::ConnectionConfig;
use crate::error::{RSocketError, Result};
use crate::frame::Frame;
use crate::handler::RSocket;
use crate::lease::LeaseHandler;
use crate::payload::{self, Payload};
use crate::send_mux::SendMultiplexer;
use crate::stream_id::{Role, StreamIdAllocator};
use crate::stream_table::{InboundSink, StreamTable};
use crate::subscriber::{FnSubscription, Publisher, Subscriber, Subscription};

/// State shared between `RequesterClient` and the connection driver that
/// dispatches inbound frames to it.
pub(crate) struct RequesterShared {
    pub(crate) stream_ids: PlMutex<StreamIdAllocator>,
    pub(crate) streams: Arc<StreamTable>,
    pub(crate) send_mux: Arc<SendMultiplexer>,
    pub(crate) lease: Arc<dyn LeaseHandler>,
    pub(crate) mtu: usize,
}

impl RequesterShared {
    fn allocate_stream_id(&self) -> u32 {
        let streams = &self.streams;
        self.stream_ids.lock().allocate(|id| streams.contains(id))
    }

    fn check_allowed(&self, payload: &Payload) -> Result<()> {
        if !self.lease.is_request_allowed() {
            return Err(RSocketError::Rejected("no lease available".to_string()));
        }
        if !payload::is_valid(self.mtu, payload) {
            return Err(RSocketError::InvalidPayload);
        }
        Ok(())
    }
}

/// The Requester-side [`RSocket`] implementation. Cheaply cloneable; every
/// clone shares the same connection state.
#[derive(Clone)]
pub struct RequesterClient {
    shared: Arc<RequesterShared>,
}

impl RequesterClient {
    pub(crate) fn new(
        role: Role,
        streams: Arc<StreamTable>,
        send_mux: Arc<SendMultiplexer>,
        lease: Arc<dyn LeaseHandler>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(RequesterShared {
                stream_ids: PlMutex::new(StreamIdAllocator::new(role)),
                streams,
                send_mux,
                lease,
                mtu: config.mtu,
            }),
        }
    }
}

/// Sends a CANCEL frame and removes the stream-table entry if dropped
/// before being explicitly disarmed — the realization of "the caller lost
/// interest" for request_response (spec §4.4: dropping the future before
/// completion cancels the in-flight request).
struct CancelOnDrop {
    armed: bool,
    stream_id: u32,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.send_mux
                .enqueue_priority(Frame::Cancel { stream_id: self.stream_id }.encode());
            self.streams.remove(self.stream_id);
        }
    }
}

/// Stream-table entry awaiting exactly one response (request_response).
struct AwaitResponseEntry {
    sender: PlMutex<Option<oneshot::Sender<Result<Payload>>>>,
}

impl InboundSink for AwaitResponseEntry {
    fn on_payload(&self, _next: bool, _complete: bool, metadata: Option<Bytes>, data: Option<Bytes>) {
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(Ok(Payload::new(data.unwrap_or_default(), metadata)));
        }
    }
    fn on_error(&self, code: u32, message: String) {
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(Err(RSocketError::from_wire(code, message)));
        }
    }
    fn on_cancel(&self) {}
    fn on_request_n(&self, _n: i64) {}
    fn on_connection_error(&self, error: &RSocketError) {
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(Err(clone_for_broadcast(error)));
        }
    }
}

/// [`RSocketError`] doesn't implement `Clone` (it wraps `std::io::Error`),
/// so a connection-wide failure is re-described rather than cloned when
/// fanning it out to every awaiting stream.
fn clone_for_broadcast(error: &RSocketError) -> RSocketError {
    RSocketError::Internal(error.to_string())
}

/// Stream-table entry for request_stream: forwards inbound PAYLOAD/ERROR to
/// the application's [`Subscriber`]; `on_cancel`/`on_request_n` are unused
/// here since the peer never drives demand for a stream it is producing
/// into (spec §4.4: demand flows requester -> responder for this shape).
struct RequesterStreamEntry {
    subscriber: Arc<dyn Subscriber>,
}

impl InboundSink for RequesterStreamEntry {
    fn on_payload(&self, next: bool, complete: bool, metadata: Option<Bytes>, data: Option<Bytes>) {
        if next {
            self.subscriber
                .on_next(Payload::new(data.unwrap_or_default(), metadata));
        }
        if complete {
            self.subscriber.on_complete();
        }
    }
    fn on_error(&self, code: u32, message: String) {
        self.subscriber
            .on_error(RSocketError::from_wire(code, message));
    }
    fn on_cancel(&self) {}
    fn on_request_n(&self, _n: i64) {}
    fn on_connection_error(&self, _error: &RSocketError) {
        self.subscriber.on_error(RSocketError::ConnectionClosed);
    }
}

/// Lazy producer returned by `request_stream`: nothing happens until
/// subscribed, and no frame is sent until the first non-zero demand (spec
/// §9 open question (c)).
struct RequesterStreamPublisher {
    shared: Arc<RequesterShared>,
    payload: Payload,
}

impl Publisher for RequesterStreamPublisher {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        if let Err(error) = self.shared.check_allowed(&self.payload) {
            let ops = FnSubscription::new(|_n| {}, || {});
            subscriber.on_subscribe(Subscription::new(ops));
            subscriber.on_error(error);
            return;
        }

        let shared = self.shared.clone();
        let payload = self.payload;
        let stream_id: Arc<PlMutex<Option<u32>>> = Arc::new(PlMutex::new(None));
        let sub_for_ops = subscriber.clone();

        let request_shared = shared.clone();
        let request_stream_id = stream_id.clone();
        let cancel_shared = shared;
        let cancel_stream_id = stream_id;

        let ops = FnSubscription::new(
            move |n: u64| {
                let mut slot = request_stream_id.lock();
                match *slot {
                    None => {
                        let id = request_shared.allocate_stream_id();
                        let entry = Arc::new(RequesterStreamEntry {
                            subscriber: sub_for_ops.clone(),
                        });
                        if request_shared.streams.insert(id, entry).is_err() {
                            sub_for_ops.on_error(RSocketError::Internal(
                                "stream id collision allocating request_stream".to_string(),
                            ));
                            return;
                        }
                        *slot = Some(id);
                        request_shared.send_mux.enqueue(
                            Frame::RequestStream {
                                stream_id: id,
                                initial_request_n: crate::subscriber::demand_to_i64(n),
                                metadata: payload.metadata.clone(),
                                data: payload.data.clone(),
                            }
                            .encode(),
                        );
                    }
                    Some(id) => {
                        request_shared.send_mux.enqueue_priority(
                            Frame::RequestN {
                                stream_id: id,
                                n: crate::subscriber::demand_to_i64(n),
                            }
                            .encode(),
                        );
                    }
                }
            },
            move || {
                if let Some(id) = *cancel_stream_id.lock() {
                    cancel_shared
                        .send_mux
                        .enqueue_priority(Frame::Cancel { stream_id: id }.encode());
                    cancel_shared.streams.remove(id);
                }
            },
        );
        subscriber.on_subscribe(Subscription::new(ops));
    }
}

#[async_trait]
impl RSocket for RequesterClient {
    async fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        self.shared.check_allowed(&payload)?;
        let stream_id = self.shared.allocate_stream_id();
        self.shared.send_mux.enqueue(
            Frame::RequestFnf {
                stream_id,
                metadata: payload.metadata,
                data: payload.data,
            }
            .encode(),
        );
        Ok(())
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload> {
        self.shared.check_allowed(&payload)?;
        let stream_id = self.shared.allocate_stream_id();
        let (tx, rx) = oneshot::channel();
        let entry = Arc::new(AwaitResponseEntry {
            sender: PlMutex::new(Some(tx)),
        });
        self.shared.streams.insert(stream_id, entry)?;
        self.shared.send_mux.enqueue(
            Frame::RequestResponse {
                stream_id,
                metadata: payload.metadata,
                data: payload.data,
            }
            .encode(),
        );

        let mut guard = CancelOnDrop {
            armed: true,
            stream_id,
            send_mux: self.shared.send_mux.clone(),
            streams: self.shared.streams.clone(),
        };
        let result = rx.await;
        guard.disarm();
        // `on_payload`/`on_error`/`on_connection_error` only hand the result
        // across the oneshot; the table entry itself is removed here, once,
        // on whichever exit path actually resolved it (spec invariant 1: a
        // stream id is in the table iff its FSM is not terminal).
        self.shared.streams.remove(stream_id);
        result.unwrap_or(Err(RSocketError::ConnectionClosed))
    }

    fn request_stream(&self, payload: Payload) -> Box<dyn Publisher> {
        Box::new(RequesterStreamPublisher {
            shared: self.shared.clone(),
            payload,
        })
    }

    fn request_channel(&self, outbound: Box<dyn Publisher>) -> Box<dyn Publisher> {
        Box::new(channel::RequesterChannelPublisher::new(
            self.shared.clone(),
            outbound,
        ))
    }

    async fn metadata_push(&self, metadata: Bytes) -> Result<()> {
        self.shared
            .send_mux
            .enqueue(Frame::MetadataPush { metadata }.encode());
        Ok(())
    }
}
