//! Responder (C7, spec §4.6): turns an inbound REQUEST_* frame into a call
//! against the application-supplied [`crate::handler::RSocket`] and routes
//! the application's production back onto the wire.
//!
//! Each inbound request gets its own small state object registered in the
//! stream table, driven by `on_payload`/`on_cancel`/`on_request_n` calls —
//! one FSM shape per interaction kind, with the per-stream serial point a
//! `parking_lot::Mutex`-guarded `Subscription`/`Subscriber`.

mod channel;

pub use channel::handle_request_channel;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{RSocketError, Result};
use crate::frame::Frame;
use crate::handler::SharedRSocket;
use crate::payload::{self, Payload};
use crate::send_mux::SendMultiplexer;
use crate::stream_table::{InboundSink, StreamTable};
use crate::subscriber::{FnSubscription, Publisher, Subscriber, Subscription};

/// A [`Publisher`] that immediately errors every subscriber, used where no
/// responder handler accepts the interaction (spec §6 default behavior).
pub struct RejectedPublisher;

impl Publisher for RejectedPublisher {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>) {
        let ops = FnSubscription::new(|_n| {}, || {});
        subscriber.on_subscribe(Subscription::new(ops));
        subscriber.on_error(RSocketError::Rejected(
            "no responder handler installed".to_string(),
        ));
    }
}

pub(crate) fn encode_error_frame(stream_id: u32, error: &RSocketError) -> Bytes {
    let code = error
        .wire_code()
        .unwrap_or(crate::error::error_code::APPLICATION_ERROR);
    Frame::Error {
        stream_id,
        error_code: code,
        message: error.to_string(),
    }
    .encode()
}

pub(crate) fn send_error(send_mux: &SendMultiplexer, stream_id: u32, error: &RSocketError) {
    send_mux.enqueue_priority(encode_error_frame(stream_id, error));
}

/// Dispatch an inbound REQUEST_FNF. Spec §4.6: errors are swallowed locally
/// (there is no stream id to report them against — the interaction model
/// has no response leg).
pub fn handle_request_fnf(handler: SharedRSocket, payload: Payload) {
    tokio::spawn(async move {
        let _ = handler.fire_and_forget(payload).await;
    });
}

/// Dispatch an inbound REQUEST_RESPONSE. Registers a cancel-only entry in
/// the stream table so a CANCEL arriving before the handler resolves drops
/// the response instead of sending it (spec §9 open question (b): a
/// canceled-before-completion request never emits ERROR).
pub fn handle_request_response(
    handler: SharedRSocket,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
    stream_id: u32,
    mtu: usize,
    payload: Payload,
) -> Result<()> {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let entry = Arc::new(CancelOnlyEntry {
        cancel: Mutex::new(Some(cancel_tx)),
    });
    streams.insert(stream_id, entry)?;

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel_rx => {
                streams.remove(stream_id);
            }
            result = handler.request_response(payload) => {
                streams.remove(stream_id);
                match result {
                    Ok(response) => {
                        if !payload::is_valid(mtu, &response) {
                            send_error(&send_mux, stream_id, &RSocketError::InvalidPayload);
                            return;
                        }
                        send_mux.enqueue(
                            Frame::Payload {
                                stream_id,
                                next: true,
                                complete: true,
                                metadata: response.metadata,
                                data: Some(response.data),
                            }
                            .encode(),
                        );
                    }
                    Err(error) => send_error(&send_mux, stream_id, &error),
                }
            }
        }
    });
    Ok(())
}

/// Stream-table entry for an in-flight request_response/fnf awaiting only a
/// cancel signal.
struct CancelOnlyEntry {
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl InboundSink for CancelOnlyEntry {
    fn on_payload(&self, _next: bool, _complete: bool, _metadata: Option<Bytes>, _data: Option<Bytes>) {}
    fn on_error(&self, _code: u32, _message: String) {}
    fn on_cancel(&self) {
        if let Some(tx) = self.cancel.lock().take() {
            let _ = tx.send(());
        }
    }
    fn on_request_n(&self, _n: i64) {}
    fn on_connection_error(&self, _error: &RSocketError) {
        self.on_cancel();
    }
}

/// Stream-table entry for an in-flight request_stream: forwards peer credit
/// and cancellation to the application's [`Subscription`].
pub(crate) struct ResponderStreamEntry {
    subscription: Mutex<Option<Subscription>>,
}

impl ResponderStreamEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            subscription: Mutex::new(None),
        })
    }
}

impl InboundSink for ResponderStreamEntry {
    fn on_payload(&self, _next: bool, _complete: bool, _metadata: Option<Bytes>, _data: Option<Bytes>) {}
    fn on_error(&self, _code: u32, _message: String) {
        self.on_cancel();
    }
    fn on_cancel(&self) {
        if let Some(subscription) = self.subscription.lock().clone() {
            subscription.cancel();
        }
    }
    fn on_request_n(&self, n: i64) {
        if n > 0 {
            if let Some(subscription) = self.subscription.lock().clone() {
                subscription.request(n as u64);
            }
        }
    }
    fn on_connection_error(&self, _error: &RSocketError) {
        self.on_cancel();
    }
}

/// [`Subscriber`] that forwards an outbound producer's items onto the wire
/// as PAYLOAD frames for `stream_id` (shared shape for request_stream's and
/// request_channel's outbound leg). `on_terminal` runs once, after the
/// terminal frame (or none, for a plain cancel) has been queued, so callers
/// can decide what "this leg is done" means for their stream-table entry —
/// a plain request_stream removes it outright, a channel's outbound leg
/// only removes it once the inbound leg is done too.
pub(crate) struct WireSubscriber {
    stream_id: u32,
    send_mux: Arc<SendMultiplexer>,
    entry: Arc<ResponderStreamEntry>,
    initial_n: i64,
    mtu: usize,
    on_terminal: Box<dyn Fn() + Send + Sync>,
}

impl WireSubscriber {
    pub(crate) fn new(
        stream_id: u32,
        send_mux: Arc<SendMultiplexer>,
        entry: Arc<ResponderStreamEntry>,
        initial_n: i64,
        mtu: usize,
        on_terminal: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            stream_id,
            send_mux,
            entry,
            initial_n,
            mtu,
            on_terminal: Box::new(on_terminal),
        }
    }
}

impl Subscriber for WireSubscriber {
    fn on_subscribe(&self, subscription: Subscription) {
        *self.entry.subscription.lock() = Some(subscription.clone());
        if self.initial_n > 0 {
            subscription.request(self.initial_n as u64);
        }
    }

    fn on_next(&self, payload: Payload) {
        if !payload::is_valid(self.mtu, &payload) {
            send_error(&self.send_mux, self.stream_id, &RSocketError::InvalidPayload);
            self.entry.on_cancel();
            (self.on_terminal)();
            return;
        }
        self.send_mux.enqueue(
            Frame::Payload {
                stream_id: self.stream_id,
                next: true,
                complete: false,
                metadata: payload.metadata,
                data: Some(payload.data),
            }
            .encode(),
        );
    }

    fn on_error(&self, error: RSocketError) {
        send_error(&self.send_mux, self.stream_id, &error);
        (self.on_terminal)();
    }

    fn on_complete(&self) {
        self.send_mux.enqueue(
            Frame::Payload {
                stream_id: self.stream_id,
                next: false,
                complete: true,
                metadata: None,
                data: None,
            }
            .encode(),
        );
        (self.on_terminal)();
    }
}

/// Dispatch an inbound REQUEST_STREAM.
pub fn handle_request_stream(
    handler: SharedRSocket,
    send_mux: Arc<SendMultiplexer>,
    streams: Arc<StreamTable>,
    stream_id: u32,
    initial_request_n: i64,
    mtu: usize,
    payload: Payload,
) -> Result<()> {
    let entry = ResponderStreamEntry::new();
    streams.insert(stream_id, entry.clone())?;

    let removal_streams = streams.clone();
    let subscriber: Arc<dyn Subscriber> = Arc::new(WireSubscriber::new(
        stream_id,
        send_mux,
        entry,
        initial_request_n,
        mtu,
        move || {
            removal_streams.remove(stream_id);
        },
    ));
    let publisher = handler.request_stream(payload);
    publisher.subscribe(subscriber);
    Ok(())
}
