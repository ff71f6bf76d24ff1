//! Stream table (C5, spec §3/§4.5) — the `stream_id -> stream state object`
//! mapping.
//!
//! A `HashMap<u32, Arc<dyn InboundSink>>` with insert/get/remove: the map
//! holds a trait object rather than a concrete stream type, since a table
//! entry may be either side of a Requester or Responder state machine, and
//! is guarded by a `parking_lot::RwLock` rather than requiring `&mut self`,
//! since spec §5 requires the stream table to be safe under concurrent
//! insert/lookup/remove from handler threads while the connection driver's
//! single dispatch loop also reads it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{RSocketError, Result};

/// The inbound half of a stream's state machine, as seen by the connection
/// driver's dispatch loop (C8). Both requester-held entries (awaiting a
/// peer's response) and responder-held entries (a locally running handler
/// whose production is gated by peer-granted credit) implement this so the
/// driver can route by stream id without knowing which side originated it.
///
/// Every method takes `&self` rather than `&mut self`: a stream entry
/// forwards the signal through its own mailbox/atomic state, serializing its
/// own FSM transitions internally (spec §5: "individual stream FSM
/// transitions are serialized per stream"), so the table itself never needs
/// exclusive access to mutate a single entry.
pub trait InboundSink: Send + Sync {
    /// A PAYLOAD frame arrived for this stream.
    fn on_payload(&self, next: bool, complete: bool, metadata: Option<Bytes>, data: Option<Bytes>);

    /// An ERROR frame arrived for this stream.
    fn on_error(&self, code: u32, message: String);

    /// A CANCEL frame arrived for this stream.
    fn on_cancel(&self);

    /// A REQUEST_N frame arrived for this stream, granting `n` more credit.
    fn on_request_n(&self, n: i64);

    /// Fail this stream immediately with a connection-level error (used when
    /// the connection terminates — spec §4.5 termination).
    fn on_connection_error(&self, error: &RSocketError);
}

/// Thread-safe `stream_id -> stream state object` map (C5).
#[derive(Default)]
pub struct StreamTable {
    entries: RwLock<HashMap<u32, Arc<dyn InboundSink>>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new stream entry. Returns an error if the id is already
    /// occupied (spec invariant: at most one stream object per id at any
    /// instant).
    pub fn insert(&self, id: u32, entry: Arc<dyn InboundSink>) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(RSocketError::StreamAlreadyExists(id));
        }
        entries.insert(id, entry);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<Arc<dyn InboundSink>> {
        self.entries.read().get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Remove and return a stream entry, if present (spec invariant 1: a
    /// stream id is in the table iff its FSM is not terminal — callers
    /// invoke this exactly once per stream, on the transition into a
    /// terminal state).
    pub fn remove(&self, id: u32) -> Option<Arc<dyn InboundSink>> {
        self.entries.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drain every entry out of the table (spec §4.5 termination: "cancel
    /// all sending subscriptions; fail all channel processors"). Returns
    /// owned handles so the caller can notify each one without holding the
    /// table lock.
    pub fn drain(&self) -> Vec<Arc<dyn InboundSink>> {
        std::mem::take(&mut *self.entries.write())
            .into_values()
            .collect()
    }
}
