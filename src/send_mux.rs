//! Outbound send multiplexer (C3, spec §4.3: "every stream's outbound frames
//! are interleaved onto one wire in FIFO-per-producer order").
//!
//! Built on `crossbeam_queue::SegQueue` for lock-free frame queuing: a
//! connection-wide multiplexer with two lanes, a priority lane for control
//! frames (CANCEL, ERROR, REQUEST_N) and a normal lane for PAYLOAD-bearing
//! frames, so a stream cancellation is never stuck behind a backlog of bulk
//! data from another stream.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use crossbeam_queue::SegQueue;
use tokio::sync::Notify;

/// Connection-wide outbound frame queue feeding the single writer task that
/// owns the transport.
pub struct SendMultiplexer {
    priority: SegQueue<Bytes>,
    normal: SegQueue<Bytes>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for SendMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl SendMultiplexer {
    pub fn new() -> Self {
        Self {
            priority: SegQueue::new(),
            normal: SegQueue::new(),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a bulk/data-bearing frame (PAYLOAD, REQUEST_*).
    pub fn enqueue(&self, frame: Bytes) {
        self.normal.push(frame);
        self.notify.notify_one();
    }

    /// Enqueue a control frame (CANCEL, ERROR, REQUEST_N) ahead of any
    /// already-queued bulk frames.
    pub fn enqueue_priority(&self, frame: Bytes) {
        self.priority.push(frame);
        self.notify.notify_one();
    }

    /// Wait for and return the next frame to write, priority lane first.
    /// Returns `None` once the multiplexer is closed and both lanes are
    /// drained.
    pub async fn dequeue(&self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.priority.pop() {
                return Some(frame);
            }
            if let Some(frame) = self.normal.pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Mark the multiplexer closed: `dequeue` returns `None` once both lanes
    /// are empty, and any task parked in `dequeue` wakes to observe that.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn priority_drains_before_normal() {
        let mux = SendMultiplexer::new();
        mux.enqueue(Bytes::from_static(b"data-1"));
        mux.enqueue(Bytes::from_static(b"data-2"));
        mux.enqueue_priority(Bytes::from_static(b"cancel"));

        assert_eq!(mux.dequeue().await, Some(Bytes::from_static(b"cancel")));
        assert_eq!(mux.dequeue().await, Some(Bytes::from_static(b"data-1")));
        assert_eq!(mux.dequeue().await, Some(Bytes::from_static(b"data-2")));
    }

    #[tokio::test]
    async fn closing_drains_then_returns_none() {
        let mux = SendMultiplexer::new();
        mux.enqueue(Bytes::from_static(b"last"));
        mux.close();
        assert_eq!(mux.dequeue().await, Some(Bytes::from_static(b"last")));
        assert_eq!(mux.dequeue().await, None);
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let mux = std::sync::Arc::new(SendMultiplexer::new());
        let waiter = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.dequeue().await })
        };
        tokio::task::yield_now().await;
        mux.enqueue(Bytes::from_static(b"late"));
        let result = waiter.await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"late")));
    }
}
