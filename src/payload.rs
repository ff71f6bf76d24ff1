//! Application payload type and the payload validator (C2, spec §4.2): a
//! boolean predicate over "does this payload fit one unfragmented frame".

use bytes::Bytes;

/// Per-frame overhead charged against the 24-bit frame length budget when
/// MTU-based fragmentation is disabled: 3-byte length prefix, 1-byte type,
/// 2-byte flags, 4-byte stream id, 3-byte metadata length prefix (when
/// present). Conservatively assumes metadata is present; callers that know
/// metadata is absent may legally fit 3 more bytes, but charging the larger
/// overhead keeps the check a single constant (spec §4.2 deliberately
/// specifies this as a coarse MTU check, not a byte-exact one).
pub const FRAME_HEADER_OVERHEAD: usize = 3 + 1 + 2 + 4 + 3;

/// An application payload: owned data plus optional metadata.
///
/// `data`/`metadata` are `bytes::Bytes`, which are themselves
/// reference-counted — "releasing" a payload in the reference-counting sense
/// described by spec §3 means dropping the last owned `Payload` value. Every
/// engine code path that accepts a `Payload` by value either forwards it
/// (transferring ownership onward) or lets it drop on every exit path,
/// including error paths; there is no `clone`-and-forget anywhere in this
/// crate's payload handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub metadata: Option<Bytes>,
}

impl Payload {
    pub fn new(data: Bytes, metadata: Option<Bytes>) -> Self {
        Self { data, metadata }
    }

    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    /// Combined size this payload would occupy in an unfragmented frame's
    /// variable-length section.
    pub fn wire_size(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, |m| m.len())
    }
}

/// Payload validator (C2). `mtu == 0` means fragmentation is disabled: a
/// payload is valid only if it (plus header overhead) fits the 24-bit frame
/// length. `mtu > 0` accepts any payload — the engine is expected to
/// fragment it, which is out of scope here (spec §4.2), but callers must
/// still route through this function so a future fragmenter has a single
/// seam to hook into.
pub fn is_valid(mtu: usize, payload: &Payload) -> bool {
    if mtu > 0 {
        return true;
    }
    payload.wire_size() + FRAME_HEADER_OVERHEAD <= crate::frame::FRAME_LENGTH_MASK
}
