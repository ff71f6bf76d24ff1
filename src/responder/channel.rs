//! Responder side of request_channel (spec §4.6, the most stateful
//! interaction: both legs can half-close independently).
//!
//! Each leg moves through `Open -> HalfClosed -> Closed` independently, as
//! two completion flags rather than one shared FSM, with the stream-table
//! entry removed once both are set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{RSocketError, Result};
use crate::frame::Frame;
use crate::handler::SharedRSocket;
use crate::payload::Payload;
use crate::responder::{ResponderStreamEntry, WireSubscriber};
use crate::send_mux::SendMultiplexer;
use crate::stream_table::{InboundSink, StreamTable};
use crate::subscriber::{FnSubscription, Publisher, Subscriber, Subscription};

/// The full responder-side state for one request_channel stream: the
/// outbound leg (this side producing, driven by peer credit) shares its
/// `Subscription` with [`ResponderStreamEntry`]; the inbound leg (peer
/// producing, this side consuming through whatever `Subscriber` the handler
/// attached) is tracked here directly.
struct ChannelEntry {
    outbound: Arc<ResponderStreamEntry>,
    inbound_subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
    inbound_done: AtomicBool,
    outbound_done: AtomicBool,
    /// The REQUEST_CHANNEL frame's `initial_request_n` already grants credit
    /// for the first inbound payload (delivered implicitly, not via a
    /// REQUEST_N frame). The first `request(n)` the application issues on the
    /// inbound `Subscription` must therefore be translated to `n - 1` on the
    /// wire; later calls pass through unchanged.
    first_request_n_sent: AtomicBool,
    /// The payload REQUEST_CHANNEL bundled inline, buffered here until the
    /// handler actually subscribes to the inbound `Publisher` — which may
    /// happen asynchronously, after `handler.request_channel` has already
    /// returned. `(complete, metadata, data)`.
    pending_first: Mutex<Option<(bool, Option<Bytes>, Option<Bytes>)>>,
}

impl ChannelEntry {
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

/// Deliver one inbound payload (the REQUEST_CHANNEL-bundled first item, or a
/// later PAYLOAD frame) to whatever `Subscriber` the handler has attached so
/// far, and retire the inbound leg on `complete`. Shared between the live
/// wire path (`ChannelInboundSink::on_payload`) and the buffered-first-item
/// replay in `InboundChannelPublisher::subscribe` so both go through the
/// same completion bookkeeping.
fn deliver_inbound_payload(
    entry: &ChannelEntry,
    streams: &StreamTable,
    stream_id: u32,
    next: bool,
    complete: bool,
    metadata: Option<Bytes>,
    data: Option<Bytes>,
) {
    if next {
        if let Some(subscriber) = entry.inbound_subscriber.lock().clone() {
            subscriber.on_next(Payload::new(data.unwrap_or_default(), metadata));
        }
    }
    if complete {
        if let Some(subscriber) = entry.inbound_subscriber.lock().clone() {
            subscriber.on_complete();
        }
        entry.mark_inbound_done();
        if entry.both_done() {
            streams.remove(stream_id);
        }
    }
}

struct ChannelInboundSink {
    stream_id: u32,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
    entry: Arc<ChannelEntry>,
}

impl InboundSink for ChannelInboundSink {
    fn on_payload(&self, next: bool, complete: bool, metadata: Option<Bytes>, data: Option<Bytes>) {
        deliver_inbound_payload(
            &self.entry,
            &self.streams,
            self.stream_id,
            next,
            complete,
            metadata,
            data,
        );
    }

    fn on_error(&self, code: u32, message: String) {
        let error = RSocketError::from_wire(code, message);
        if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
            subscriber.on_error(error);
        }
        self.entry.outbound.on_cancel();
        self.entry.mark_inbound_done();
        self.entry.mark_outbound_done();
        self.streams.remove(self.stream_id);
    }

    fn on_cancel(&self) {
        // Peer no longer wants our outbound production.
        self.entry.outbound.on_cancel();
        self.entry.mark_outbound_done();
        self.maybe_remove();
    }

    fn on_request_n(&self, n: i64) {
        self.entry.outbound.on_request_n(n);
    }

    fn on_connection_error(&self, error: &RSocketError) {
        if let Some(subscriber) = self.entry.inbound_subscriber.lock().clone() {
            subscriber.on_error(RSocketError::ConnectionClosed);
        }
        self.entry.outbound.on_cancel();
        let _ = error;
    }
}

impl ChannelInboundSink {
    fn maybe_remove(&self) {
        if self.entry.both_done() {
            self.streams.remove(self.stream_id);
        }
    }
}

/// The `Publisher` handed to the application as the inbound half of a
/// request_channel: subscribing attaches the application's own `Subscriber`
/// to receive the peer's payloads, and grants the peer credit / sends CANCEL
/// through the returned `Subscription`.
struct InboundChannelPublisher {
    stream_id: u32,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
    entry: Arc<ChannelEntry>,
}

impl Publisher for InboundChannelPublisher {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        *self.entry.inbound_subscriber.lock() = Some(subscriber.clone());

        let stream_id = self.stream_id;
        let send_mux = self.send_mux.clone();
        let entry = self.entry.clone();
        let cancel_entry = self.entry.clone();
        let ops = FnSubscription::new(
            move |n: u64| {
                let wire_n = if entry
                    .first_request_n_sent
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    crate::subscriber::demand_to_i64(n).saturating_sub(1)
                } else {
                    crate::subscriber::demand_to_i64(n)
                };
                if wire_n > 0 {
                    send_mux.enqueue_priority(
                        Frame::RequestN {
                            stream_id,
                            n: wire_n,
                        }
                        .encode(),
                    );
                }
            },
            move || {
                cancel_entry.mark_inbound_done();
            },
        );
        subscriber.on_subscribe(Subscription::new(ops));

        // Replay the payload REQUEST_CHANNEL bundled inline, now that the
        // handler has actually attached a subscriber — this may run well
        // after `handle_request_channel` returned, if the handler subscribes
        // asynchronously (spec: the bundled payload must reach `P` before
        // the handler is considered subscribed, not get dropped on the floor
        // if subscription is deferred).
        if let Some((complete, metadata, data)) = self.entry.pending_first.lock().take() {
            deliver_inbound_payload(
                &self.entry,
                &self.streams,
                self.stream_id,
                true,
                complete,
                metadata,
                data,
            );
        }
    }
}

/// Dispatch an inbound REQUEST_CHANNEL.
pub fn handle_request_channel(
    handler: SharedRSocket,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
    stream_id: u32,
    initial_request_n: i64,
    mtu: usize,
    first_complete: bool,
    first_payload: Payload,
) -> Result<()> {
    let outbound = ResponderStreamEntry::new();
    let entry = Arc::new(ChannelEntry {
        outbound: outbound.clone(),
        inbound_subscriber: Mutex::new(None),
        inbound_done: AtomicBool::new(false),
        outbound_done: AtomicBool::new(false),
        first_request_n_sent: AtomicBool::new(false),
        // Buffered *before* the handler is invoked below, so the payload is
        // in `P` before the handler is subscribed to it, regardless of
        // whether that subscription happens synchronously or later.
        pending_first: Mutex::new(Some((
            first_complete,
            first_payload.metadata,
            Some(first_payload.data),
        ))),
    });

    let sink = Arc::new(ChannelInboundSink {
        stream_id,
        send_mux: send_mux.clone(),
        streams: streams.clone(),
        entry: entry.clone(),
    });
    streams.insert(stream_id, sink)?;

    let inbound_publisher: Box<dyn Publisher> = Box::new(InboundChannelPublisher {
        stream_id,
        send_mux: send_mux.clone(),
        streams: streams.clone(),
        entry: entry.clone(),
    });
    let outbound_publisher = handler.request_channel(inbound_publisher);

    let terminal_streams = streams.clone();
    let terminal_entry = entry.clone();
    let outbound_subscriber: Arc<dyn Subscriber> = Arc::new(WireSubscriber::new(
        stream_id,
        send_mux,
        outbound,
        initial_request_n,
        mtu,
        move || {
            terminal_entry.mark_outbound_done();
            if terminal_entry.both_done() {
                terminal_streams.remove(stream_id);
            }
        },
    ));
    outbound_publisher.subscribe(outbound_subscriber);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RSocket;
    use async_trait::async_trait;

    /// A handler whose outbound leg subscribes and completes immediately,
    /// and which drains the inbound leg with a subscriber that keeps it
    /// open (never calls cancel/complete itself) — so the test controls
    /// termination of the inbound leg entirely through `first_complete`.
    struct ImmediateCompleteHandler;

    struct ThrowawaySubscriber;
    impl Subscriber for ThrowawaySubscriber {
        fn on_subscribe(&self, subscription: Subscription) {
            subscription.request(u64::MAX);
        }
        fn on_next(&self, _payload: Payload) {}
        fn on_error(&self, _error: RSocketError) {}
        fn on_complete(&self) {}
    }

    struct ImmediateCompletePublisher;
    impl Publisher for ImmediateCompletePublisher {
        fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
            let ops = FnSubscription::new(|_n| {}, || {});
            subscriber.on_subscribe(Subscription::new(ops));
            subscriber.on_complete();
        }
    }

    #[async_trait]
    impl RSocket for ImmediateCompleteHandler {
        async fn fire_and_forget(&self, _payload: Payload) -> Result<()> {
            Ok(())
        }
        async fn request_response(&self, payload: Payload) -> Result<Payload> {
            Ok(payload)
        }
        fn request_stream(&self, _payload: Payload) -> Box<dyn Publisher> {
            Box::new(crate::responder::RejectedPublisher)
        }
        fn request_channel(&self, inbound: Box<dyn Publisher>) -> Box<dyn Publisher> {
            inbound.subscribe(Arc::new(ThrowawaySubscriber));
            Box::new(ImmediateCompletePublisher)
        }
        async fn metadata_push(&self, _metadata: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn outbound_completes_and_entry_removed_once_inbound_also_completes() {
        let handler: crate::handler::SharedRSocket = Arc::new(ImmediateCompleteHandler);
        let send_mux = Arc::new(SendMultiplexer::new());
        let streams = Arc::new(StreamTable::new());

        handle_request_channel(
            handler,
            send_mux.clone(),
            streams.clone(),
            1,
            5,
            0,
            true,
            Payload::from_data(&b"first"[..]),
        )
        .unwrap();

        let frame = send_mux.dequeue().await.unwrap();
        match Frame::decode(&frame).unwrap() {
            Frame::Payload { complete, next, .. } => {
                assert!(complete);
                assert!(!next);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // first_complete was true, so the inbound leg finished in the same
        // call; both legs done means the entry is gone.
        assert!(!streams.contains(1));
    }

    #[tokio::test]
    async fn request_n_before_inbound_completes_keeps_entry_alive() {
        let handler: crate::handler::SharedRSocket = Arc::new(ImmediateCompleteHandler);
        let send_mux = Arc::new(SendMultiplexer::new());
        let streams = Arc::new(StreamTable::new());

        handle_request_channel(
            handler,
            send_mux.clone(),
            streams.clone(),
            1,
            5,
            0,
            false,
            Payload::from_data(&b"first"[..]),
        )
        .unwrap();

        // Drain the outbound completion frame; the inbound leg is still
        // open (first_complete was false), so the entry must remain.
        let _ = send_mux.dequeue().await.unwrap();
        assert!(streams.contains(1));

        streams.get(1).unwrap().on_request_n(3);
        assert!(streams.contains(1));
    }

    /// A handler that stashes the inbound publisher instead of subscribing
    /// to it inline, simulating a handler that attaches its subscriber from
    /// a spawned task some time after `request_channel` returns.
    struct DeferredSubscribeHandler {
        slot: Arc<Mutex<Option<Box<dyn Publisher>>>>,
    }

    #[async_trait]
    impl RSocket for DeferredSubscribeHandler {
        async fn fire_and_forget(&self, _payload: Payload) -> Result<()> {
            Ok(())
        }
        async fn request_response(&self, payload: Payload) -> Result<Payload> {
            Ok(payload)
        }
        fn request_stream(&self, _payload: Payload) -> Box<dyn Publisher> {
            Box::new(crate::responder::RejectedPublisher)
        }
        fn request_channel(&self, inbound: Box<dyn Publisher>) -> Box<dyn Publisher> {
            *self.slot.lock() = Some(inbound);
            Box::new(ImmediateCompletePublisher)
        }
        async fn metadata_push(&self, _metadata: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSubscriber {
        items: Mutex<Vec<Payload>>,
    }

    impl Subscriber for RecordingSubscriber {
        fn on_subscribe(&self, subscription: Subscription) {
            subscription.request(u64::MAX);
        }
        fn on_next(&self, payload: Payload) {
            self.items.lock().push(payload);
        }
        fn on_error(&self, _error: RSocketError) {}
        fn on_complete(&self) {}
    }

    #[tokio::test]
    async fn bundled_first_payload_survives_a_deferred_subscribe() {
        let slot: Arc<Mutex<Option<Box<dyn Publisher>>>> = Arc::new(Mutex::new(None));
        let handler: crate::handler::SharedRSocket = Arc::new(DeferredSubscribeHandler {
            slot: slot.clone(),
        });
        let send_mux = Arc::new(SendMultiplexer::new());
        let streams = Arc::new(StreamTable::new());

        handle_request_channel(
            handler,
            send_mux.clone(),
            streams.clone(),
            1,
            5,
            0,
            false,
            Payload::from_data(&b"first"[..]),
        )
        .unwrap();

        // request_channel has already returned; nothing was delivered yet
        // because the handler never subscribed.
        let inbound = slot.lock().take().expect("handler stashed the publisher");
        let recording = Arc::new(RecordingSubscriber::default());
        inbound.subscribe(recording.clone());

        let items = recording.items.lock();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, Bytes::from_static(b"first"));
    }
}
