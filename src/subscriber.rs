//! The reactive-streams-flavored contract used at every Requester/Responder
//! seam (spec §9 design notes): a thin `Subscriber`/`Subscription` pair
//! instead of pulling in a `Stream`/`Sink` abstraction from the futures
//! ecosystem — a small push/pull contract named at a module seam rather
//! than handing out concrete channel types.
//!
//! A [`Publisher`] is something that can be subscribed to exactly once; a
//! [`Subscriber`] is notified of items, errors and completion; a
//! [`Subscription`] is how a subscriber grants demand (credit) back to its
//! publisher and, if it loses interest, cancels. This mirrors one direction
//! of the duplex RSocket interactions: the direction data flows in is
//! `on_next`/`on_complete`/`on_error` calls, and the direction credit flows
//! in is `request`/`cancel` calls.

use std::sync::Arc;

use crate::error::RSocketError;
use crate::payload::Payload;

/// Demand/credit a subscriber grants its publisher, saturating rather than
/// overflowing (spec §4.4: REQUEST_N's running total saturates at `i64::MAX`
/// rather than wrapping — mirrored here for any party accumulating demand
/// locally rather than just on the wire).
pub fn add_demand(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta)
}

/// Narrow a `request(n)` call's `u64` (callers often pass `u64::MAX` as the
/// conventional "unbounded" request, following the reactive-streams
/// `Long.MAX_VALUE` idiom) down to the `i64` the frame layer works in,
/// saturating instead of wrapping through a negative value.
pub fn demand_to_i64(n: u64) -> i64 {
    n.min(i64::MAX as u64) as i64
}

/// Receives items pushed by a [`Publisher`].
///
/// All methods take `&self` (not `&mut self`): implementations that need
/// mutable state serialize it behind an internal mailbox or lock, since
/// calls may arrive from a different task than the one that created the
/// subscriber (spec §5: per-stream FSM transitions are serialized, but not
/// necessarily all on one thread).
pub trait Subscriber: Send + Sync {
    /// Called exactly once, before any other method, with a handle the
    /// subscriber uses to request items or cancel. No items are produced
    /// until `subscription.request(n)` is called at least once (spec §4.1:
    /// "no frame is emitted until subscribed").
    fn on_subscribe(&self, subscription: Subscription);

    /// A single item was produced.
    fn on_next(&self, payload: Payload);

    /// The publisher terminated with an error. Terminal: no further calls
    /// follow.
    fn on_error(&self, error: RSocketError);

    /// The publisher terminated normally. Terminal: no further calls follow.
    fn on_complete(&self);
}

pub trait SubscriptionOps: Send + Sync {
    fn request(&self, n: u64);
    fn cancel(&self);
}

/// Handle a [`Subscriber`] uses to grant demand to, or cancel, its
/// publisher. Cheaply cloneable; cloning does not duplicate the underlying
/// stream.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<dyn SubscriptionOps>,
}

impl Subscription {
    pub fn new(ops: Arc<dyn SubscriptionOps>) -> Self {
        Self { inner: ops }
    }

    /// Request `n` more items. `n == 0` is a legal no-op (spec §4.3 open
    /// question (c): requesting zero up front never causes anything to be
    /// sent).
    pub fn request(&self, n: u64) {
        if n > 0 {
            self.inner.request(n);
        }
    }

    /// Stop receiving items. Idempotent; safe to call after termination.
    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Something that can be subscribed to exactly once. Requester operations
/// that return a stream of results (request_stream, request_channel) hand
/// back a `Publisher`; the application subscribes when it is ready to
/// consume.
pub trait Publisher: Send {
    fn subscribe(self: Box<Self>, subscriber: Arc<dyn Subscriber>);
}

/// A closure-backed [`SubscriptionOps`] for callers that don't need a
/// dedicated type, e.g. wiring test doubles.
pub struct FnSubscription<R, C>
where
    R: Fn(u64) + Send + Sync,
    C: Fn() + Send + Sync,
{
    request: R,
    cancel: C,
}

impl<R, C> FnSubscription<R, C>
where
    R: Fn(u64) + Send + Sync,
    C: Fn() + Send + Sync,
{
    pub fn new(request: R, cancel: C) -> Arc<dyn SubscriptionOps> {
        Arc::new(Self { request, cancel })
    }
}

impl<R, C> SubscriptionOps for FnSubscription<R, C>
where
    R: Fn(u64) + Send + Sync,
    C: Fn() + Send + Sync,
{
    fn request(&self, n: u64) {
        (self.request)(n)
    }
    fn cancel(&self) {
        (self.cancel)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    struct RecordingSubscriber {
        items: Mutex<Vec<Payload>>,
        completed: AtomicBool,
        errored: AtomicBool,
    }

    impl Subscriber for RecordingSubscriber {
        fn on_subscribe(&self, _subscription: Subscription) {}
        fn on_next(&self, payload: Payload) {
            self.items.lock().unwrap().push(payload);
        }
        fn on_error(&self, _error: RSocketError) {
            self.errored.store(true, Ordering::SeqCst);
        }
        fn on_complete(&self) {
            self.completed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn zero_request_is_a_no_op() {
        let requested = Arc::new(AtomicU64::new(0));
        let r = requested.clone();
        let ops = FnSubscription::new(move |n| { r.fetch_add(n, Ordering::SeqCst); }, || {});
        let sub = Subscription::new(ops);
        sub.request(0);
        assert_eq!(requested.load(Ordering::SeqCst), 0);
        sub.request(5);
        assert_eq!(requested.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn cancel_reaches_subscription_ops() {
        let canceled = Arc::new(AtomicBool::new(false));
        let c = canceled.clone();
        let ops = FnSubscription::new(|_| {}, move || c.store(true, Ordering::SeqCst));
        let sub = Subscription::new(ops);
        sub.cancel();
        assert!(canceled.load(Ordering::SeqCst));
    }

    #[test]
    fn demand_saturates_instead_of_overflowing() {
        assert_eq!(add_demand(i64::MAX - 1, 10), i64::MAX);
        assert_eq!(add_demand(5, 3), 8);
    }

    #[test]
    fn demand_to_i64_saturates_unbounded_request() {
        assert_eq!(demand_to_i64(u64::MAX), i64::MAX);
        assert_eq!(demand_to_i64(5), 5);
    }

    #[test]
    fn recording_subscriber_records_items() {
        let sub = Arc::new(RecordingSubscriber {
            items: Mutex::new(Vec::new()),
            completed: AtomicBool::new(false),
            errored: AtomicBool::new(false),
        });
        sub.on_next(Payload::from_data(&b"a"[..]));
        sub.on_next(Payload::from_data(&b"b"[..]));
        sub.on_complete();
        assert_eq!(sub.items.lock().unwrap().len(), 2);
        assert!(sub.completed.load(Ordering::SeqCst));
        assert!(!sub.errored.load(Ordering::SeqCst));
    }
}
