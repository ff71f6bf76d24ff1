//! Requester side of request_channel (spec §4.4/§6): mirrors the responder's
//! two-leg bookkeeping (`responder/channel.rs`) with the outbound and
//! inbound roles swapped, plus the one wrinkle unique to opening a channel
//! from this side — REQUEST_CHANNEL's wire format bundles the first outbound
//! payload inline, so nothing is sent to the peer until the application's
//! own outbound producer yields (or completes without) its first item.
//!
//! The split into an `OutboundRelay` (drives the local producer) and a
//! `RequesterChannelSink` (drives the inbound leg) mirrors
//! `responder/channel.rs`'s `WireSubscriber`/`ChannelInboundSink` split.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex as PlMutex;

use crate::error::RSocketError;
use crate::frame::Frame;
use crate::payload::{self, Payload};
use crate::requester::RequesterShared;
use crate::stream_table::InboundSink;
use crate::subscriber::{FnSubscription, Publisher, Subscriber, Subscription};

/// Shared state for one requester-originated channel: `outbound_subscription`
/// is the handle back into the application's own producer (pulled from when
/// the peer grants credit via REQUEST_N); `inbound_subscriber` is the
/// application's consumer of the peer's payloads. `stream_id` is `None`
/// until the outbound leg's first item (or immediate completion) opens the
/// channel on the wire.
struct RequesterChannelEntry {
    inbound_subscriber: PlMutex<Option<Arc<dyn Subscriber>>>,
    outbound_subscription: PlMutex<Option<Subscription>>,
    stream_id: PlMutex<Option<u32>>,
    started: AtomicBool,
    inbound_done: AtomicBool,
    outbound_done: AtomicBool,
}

impl RequesterChannelEntry {
    fn mark_inbound_done(&self) {
        self.inbound_done.store(true, Ordering::SeqCst);
    }

    fn mark_outbound_done(&self) {
        self.outbound_done.store(true, Ordering::SeqCst);
    }

    fn both_done(&self) -> bool {
        self.inbound_done.load(Ordering::SeqCst) && self.outbound_done.load(Ordering::SeqCst)
    }
}

/// [`Subscriber`] attached to the application's own outbound [`Publisher`].
/// Its first `on_next`/`on_complete` opens the channel by sending
/// REQUEST_CHANNEL; every call after that sends plain PAYLOAD frames, the
/// same way `WireSubscriber` does for a plain request_stream.
struct OutboundRelay {
    shared: Arc<RequesterShared>,
    entry: Arc<RequesterChannelEntry>,
    initial_request_n: i64,
}

impl OutboundRelay {
    fn open(&self, metadata: Option<Bytes>, data: Bytes, complete: bool) {
        let stream_id = self.shared.allocate_stream_id();
        let sink = Arc::new(RequesterChannelSink {
            stream_id,
            shared: self.shared.clone(),
            entry: self.entry.clone(),
        });
        if self.shared.streams.insert(stream_id, sink).is_err() {
            if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
                subscriber.on_error(RSocketError::Internal(
                    "stream id collision opening request_channel".to_string(),
                ));
            }
            return;
        }
        *self.entry.stream_id.lock() = Some(stream_id);
        self.shared.send_mux.enqueue(
            Frame::RequestChannel {
                stream_id,
                initial_request_n: self.initial_request_n,
                complete,
                metadata,
                data,
            }
            .encode(),
        );
        if complete {
            self.entry.mark_outbound_done();
        }
    }

    fn maybe_remove(&self) {
        if self.entry.both_done() {
            if let Some(stream_id) = *self.entry.stream_id.lock() {
                self.shared.streams.remove(stream_id);
            }
        }
    }

    /// A locally-produced outbound payload failed validation (spec §4.2/4.3).
    /// Fails both legs with `INVALID_PAYLOAD`, cancels the local producer,
    /// and — only if REQUEST_CHANNEL already opened the wire stream — sends
    /// CANCEL and removes the stream-table entry.
    fn fail_invalid(&self) {
        let stream_id = *self.entry.stream_id.lock();
        if let Some(stream_id) = stream_id {
            self.shared
                .send_mux
                .enqueue_priority(Frame::Cancel { stream_id }.encode());
        }
        if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
            subscriber.on_error(RSocketError::InvalidPayload);
        }
        if let Some(subscription) = self.entry.outbound_subscription.lock().clone() {
            subscription.cancel();
        }
        self.entry.mark_outbound_done();
        self.entry.mark_inbound_done();
        if let Some(stream_id) = stream_id {
            self.shared.streams.remove(stream_id);
        }
    }
}

impl Subscriber for OutboundRelay {
    fn on_subscribe(&self, subscription: Subscription) {
        *self.entry.outbound_subscription.lock() = Some(subscription.clone());
        // Pull exactly one item — REQUEST_CHANNEL needs it to open the wire
        // stream; further demand comes only from the peer's REQUEST_N.
        subscription.request(1);
    }

    fn on_next(&self, payload: Payload) {
        if !payload::is_valid(self.shared.mtu, &payload) {
            // The payload itself is released by dropping it here (spec
            // §4.3: invalid locally-produced payloads fail the stream with
            // INVALID_PAYLOAD; for request-channel this still emits CANCEL
            // once the wire stream is already open, so the observed sent
            // sequence is exactly [REQUEST_CHANNEL, CANCEL]).
            self.fail_invalid();
            return;
        }
        let stream_id = *self.entry.stream_id.lock();
        match stream_id {
            None => self.open(payload.metadata, payload.data, false),
            Some(stream_id) => {
                self.shared.send_mux.enqueue(
                    Frame::Payload {
                        stream_id,
                        next: true,
                        complete: false,
                        metadata: payload.metadata,
                        data: Some(payload.data),
                    }
                    .encode(),
                );
            }
        }
    }

    fn on_error(&self, error: RSocketError) {
        if let Some(stream_id) = *self.entry.stream_id.lock() {
            crate::responder::send_error(&self.shared.send_mux, stream_id, &error);
        } else if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
            subscriber.on_error(error);
        }
        self.entry.mark_outbound_done();
        self.maybe_remove();
    }

    fn on_complete(&self) {
        match *self.entry.stream_id.lock() {
            None => self.open(None, Bytes::new(), true),
            Some(stream_id) => {
                self.shared.send_mux.enqueue(
                    Frame::Payload {
                        stream_id,
                        next: false,
                        complete: true,
                        metadata: None,
                        data: None,
                    }
                    .encode(),
                );
                self.entry.mark_outbound_done();
            }
        }
        self.maybe_remove();
    }
}

/// Stream-table entry for a requester-originated channel: routes the peer's
/// PAYLOAD/ERROR to the application's inbound subscriber, and the peer's
/// CANCEL/REQUEST_N to the local outbound producer's subscription.
struct RequesterChannelSink {
    stream_id: u32,
    shared: Arc<RequesterShared>,
    entry: Arc<RequesterChannelEntry>,
}

impl RequesterChannelSink {
    fn maybe_remove(&self) {
        if self.entry.both_done() {
            self.shared.streams.remove(self.stream_id);
        }
    }
}

impl InboundSink for RequesterChannelSink {
    fn on_payload(&self, next: bool, complete: bool, metadata: Option<Bytes>, data: Option<Bytes>) {
        if next {
            if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
                subscriber.on_next(Payload::new(data.unwrap_or_default(), metadata));
            }
        }
        if complete {
            if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
                subscriber.on_complete();
            }
            self.entry.mark_inbound_done();
            self.maybe_remove();
        }
    }

    fn on_error(&self, code: u32, message: String) {
        let error = RSocketError::from_wire(code, message);
        if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
            subscriber.on_error(error);
        }
        if let Some(subscription) = self.entry.outbound_subscription.lock().clone() {
            subscription.cancel();
        }
        self.entry.mark_inbound_done();
        self.entry.mark_outbound_done();
        self.shared.streams.remove(self.stream_id);
    }

    fn on_cancel(&self) {
        if let Some(subscription) = self.entry.outbound_subscription.lock().clone() {
            subscription.cancel();
        }
        self.entry.mark_outbound_done();
        self.maybe_remove();
    }

    fn on_request_n(&self, n: i64) {
        if n > 0 {
            if let Some(subscription) = self.entry.outbound_subscription.lock().clone() {
                subscription.request(n as u64);
            }
        }
    }

    fn on_connection_error(&self, _error: &RSocketError) {
        if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
            subscriber.on_error(RSocketError::ConnectionClosed);
        }
        if let Some(subscription) = self.entry.outbound_subscription.lock().clone() {
            subscription.cancel();
        }
    }
}

/// The [`Publisher`] returned by `RequesterClient::request_channel` to the
/// application: its `subscribe` hands back a `Subscription` whose first
/// `request(n)` opens the channel (spec §9 open question (c): laziness
/// extends to request_channel the same way it does to request_stream).
pub(crate) struct RequesterChannelPublisher {
    shared: Arc<RequesterShared>,
    outbound: PlMutex<Option<Box<dyn Publisher>>>,
}

impl RequesterChannelPublisher {
    pub(crate) fn new(shared: Arc<RequesterShared>, outbound: Box<dyn Publisher>) -> Self {
        Self {
            shared,
            outbound: PlMutex::new(Some(outbound)),
        }
    }
}

impl Publisher for RequesterChannelPublisher {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        let entry = Arc::new(RequesterChannelEntry {
            inbound_subscriber: PlMutex::new(Some(subscriber.clone())),
            outbound_subscription: PlMutex::new(None),
            stream_id: PlMutex::new(None),
            started: AtomicBool::new(false),
            inbound_done: AtomicBool::new(false),
            outbound_done: AtomicBool::new(false),
        });
        let outbound = Arc::new(self.outbound);
        let shared = self.shared;

        let request_entry = entry.clone();
        let request_shared = shared.clone();
        let request_outbound = outbound.clone();
        let cancel_entry = entry.clone();
        let cancel_shared = shared.clone();

        let ops = FnSubscription::new(
            move |n: u64| {
                let already_started = request_entry.started.swap(true, Ordering::SeqCst);
                if !already_started {
                    if let Some(outbound_publisher) = request_outbound.lock().take() {
                        let relay: Arc<dyn Subscriber> = Arc::new(OutboundRelay {
                            shared: request_shared.clone(),
                            entry: request_entry.clone(),
                            initial_request_n: crate::subscriber::demand_to_i64(n),
                        });
                        outbound_publisher.subscribe(relay);
                    }
                } else if let Some(stream_id) = *request_entry.stream_id.lock() {
                    request_shared.send_mux.enqueue_priority(
                        Frame::RequestN {
                            stream_id,
                            n: crate::subscriber::demand_to_i64(n),
                        }
                        .encode(),
                    );
                }
            },
            move || {
                cancel_entry.mark_inbound_done();
                if let Some(stream_id) = *cancel_entry.stream_id.lock() {
                    cancel_shared
                        .send_mux
                        .enqueue_priority(Frame::Cancel { stream_id }.encode());
                    if cancel_entry.both_done() {
                        cancel_shared.streams.remove(stream_id);
                    }
                }
            },
        );
        subscriber.on_subscribe(Subscription::new(ops));
    }
}
