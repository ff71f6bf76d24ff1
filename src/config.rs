//! Connection configuration: a plain struct of tunables with a `Default`
//! impl, owned by the connection and consulted at setup/handshake time and
//! for the no-op lease/MTU behavior spec §6 prescribes when the application
//! doesn't override it.

use std::time::Duration;

/// Tunables for a single connection (spec §6: setup interaction, MTU/
/// fragmentation, lease).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum number of concurrently open streams this side will track
    /// before rejecting new requester operations locally (spec §4.7 names
    /// this as a deliberately out-of-scope resource limit upstream of the
    /// engine; kept here as the one knob that lets a caller opt into a
    /// limit rather than hard-coding "unbounded").
    pub max_concurrent_streams: u32,

    /// `0` disables fragmentation: payloads that would not fit in a single
    /// frame are rejected by the payload validator (C2) instead of being
    /// split. Any other value is the negotiated maximum frame payload size
    /// used by a (currently unimplemented) fragmenter (spec §4.2 Non-goals).
    pub mtu: usize,

    /// Interval at which this side emits KEEPALIVE frames once the
    /// connection reaches `Open` (spec §6 setup interaction). `None` means
    /// keepalives are the transport's responsibility, not this engine's.
    pub keepalive_interval: Option<Duration>,

    /// Advertised SETUP metadata/data MIME types (spec §6).
    pub metadata_mime_type: String,
    pub data_mime_type: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: u32::MAX,
            mtu: 0,
            keepalive_interval: Some(Duration::from_secs(20)),
            metadata_mime_type: "application/octet-stream".to_string(),
            data_mime_type: "application/octet-stream".to_string(),
        }
    }
}
