//! Unhandled/connection-level error reporting.
//!
//! The engine surfaces per-call failures directly to whoever made the call,
//! but some errors have no local caller waiting — a protocol violation
//! discovered while dispatching an inbound frame, or a connection-level
//! ERROR frame from the peer. Those go through an `ErrorSink`, backed by
//! `tracing` for exactly this kind of "nobody's waiting on this, but
//! someone should see it" event.

use crate::error::RSocketError;

pub trait ErrorSink: Send + Sync {
    fn on_error(&self, error: &RSocketError);
}

/// Default sink: logs at `error` level via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn on_error(&self, error: &RSocketError) {
        tracing::error!(error = %error, "rsocket connection error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_sink_does_not_panic() {
        let sink = TracingErrorSink;
        sink.on_error(&RSocketError::ConnectionClosed);
    }
}
