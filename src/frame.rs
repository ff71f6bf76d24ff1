//! Frame codec façade (C1, spec §4.1) — pure encode/decode functions over
//! byte buffers plus field accessors. No frame type mutates a reader
//! position observable to callers; `decode` takes a borrowed slice and
//! returns owned `Bytes` copies for variable-length fields.
//!
//! Binary layout (all integers big-endian): one byte for a type tag, then
//! fields per type, with bounds checks before every read, covering the full
//! RSocket frame set:
//!
//! ```text
//! +--------+----------------+----------------------+
//! | type   |     flags      |  ... fields per type  |
//! | (1B)   |     (2B)       |                       |
//! +--------+----------------+-----------------------+
//! ```
//!
//! Stream-scoped frames additionally carry a 4-byte stream id (top bit
//! always zero, giving 31 usable bits per spec §3); connection-scoped frames
//! (SETUP, LEASE, KEEPALIVE, METADATA_PUSH, RESUME, RESUME_OK) carry none —
//! their stream id is implicitly zero.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RSocketError, Result};

/// 24-bit frame length mask (spec §4.2, §8): the largest frame length
/// representable when MTU-based fragmentation is disabled.
pub const FRAME_LENGTH_MASK: usize = 0x00FF_FFFF;

/// Stream ids are 31 bits on the wire (spec §3); this is the ceiling the
/// allocator (`stream_id.rs`) wraps below.
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// RSocket frame type identifiers (spec §3 `FrameType` variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    KeepAlive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
    Ext = 0x3F,
}

impl TryFrom<u8> for FrameType {
    type Error = RSocketError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Setup),
            0x02 => Ok(FrameType::Lease),
            0x03 => Ok(FrameType::KeepAlive),
            0x04 => Ok(FrameType::RequestResponse),
            0x05 => Ok(FrameType::RequestFnf),
            0x06 => Ok(FrameType::RequestStream),
            0x07 => Ok(FrameType::RequestChannel),
            0x08 => Ok(FrameType::RequestN),
            0x09 => Ok(FrameType::Cancel),
            0x0A => Ok(FrameType::Payload),
            0x0B => Ok(FrameType::Error),
            0x0C => Ok(FrameType::MetadataPush),
            0x0D => Ok(FrameType::Resume),
            0x0E => Ok(FrameType::ResumeOk),
            0x3F => Ok(FrameType::Ext),
            other => Err(RSocketError::UnknownFrameType(other)),
        }
    }
}

/// Frame header flags (spec §6): M (metadata present), F (follows/fragment),
/// C (complete), N (next), plus a few connection-scoped bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u16);

impl Flags {
    pub const NONE: Self = Self(0x0000);
    pub const METADATA: Self = Self(0x0100);
    pub const FOLLOWS: Self = Self(0x0080);
    pub const COMPLETE: Self = Self(0x0040);
    pub const NEXT: Self = Self(0x0020);
    pub const IGNORE: Self = Self(0x0200);
    pub const RESUME_ENABLE: Self = Self(0x0080);
    pub const LEASE: Self = Self(0x0040);
    pub const RESPOND: Self = Self(0x0080);

    pub fn contains(self, flag: Flags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    fn with(self, flag: Flags, set: bool) -> Self {
        if set {
            Self(self.0 | flag.0)
        } else {
            Self(self.0 & !flag.0)
        }
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// RSocket wire frame (spec §3 `Frame`, §6 wire format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// SETUP: connection-scoped; out of scope for this engine beyond
    /// carrying the fields a handshake layer would need (spec §1).
    Setup {
        major_version: u16,
        minor_version: u16,
        keepalive_interval_ms: u32,
        max_lifetime_ms: u32,
        resume_token: Option<Bytes>,
        metadata_mime_type: String,
        data_mime_type: String,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    /// LEASE: connection-scoped; carries the credit grant. The engine only
    /// consumes a boolean "lease available" predicate (spec §1) — this
    /// frame exists so a lease negotiation layer has something to send.
    Lease {
        time_to_live_ms: u32,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    },
    KeepAlive {
        respond: bool,
        last_received_position: u64,
        data: Bytes,
    },
    RequestResponse {
        stream_id: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestFnf {
        stream_id: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestStream {
        stream_id: u32,
        initial_request_n: i64,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestChannel {
        stream_id: u32,
        initial_request_n: i64,
        complete: bool,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestN {
        stream_id: u32,
        n: i64,
    },
    Cancel {
        stream_id: u32,
    },
    /// PAYLOAD: `next`/`complete` together encode NEXT, COMPLETE, and
    /// NEXT_COMPLETE (both set) per spec §3.
    Payload {
        stream_id: u32,
        next: bool,
        complete: bool,
        metadata: Option<Bytes>,
        data: Option<Bytes>,
    },
    Error {
        stream_id: u32,
        error_code: u32,
        message: String,
    },
    MetadataPush {
        metadata: Bytes,
    },
    Resume {
        major_version: u16,
        minor_version: u16,
        resume_token: Bytes,
        last_received_server_position: u64,
        first_available_client_position: u64,
    },
    ResumeOk {
        last_received_client_position: u64,
    },
    Ext {
        stream_id: u32,
        extended_type: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
}

impl Frame {
    /// Return the frame type discriminant.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Setup { .. } => FrameType::Setup,
            Frame::Lease { .. } => FrameType::Lease,
            Frame::KeepAlive { .. } => FrameType::KeepAlive,
            Frame::RequestResponse { .. } => FrameType::RequestResponse,
            Frame::RequestFnf { .. } => FrameType::RequestFnf,
            Frame::RequestStream { .. } => FrameType::RequestStream,
            Frame::RequestChannel { .. } => FrameType::RequestChannel,
            Frame::RequestN { .. } => FrameType::RequestN,
            Frame::Cancel { .. } => FrameType::Cancel,
            Frame::Payload { .. } => FrameType::Payload,
            Frame::Error { .. } => FrameType::Error,
            Frame::MetadataPush { .. } => FrameType::MetadataPush,
            Frame::Resume { .. } => FrameType::Resume,
            Frame::ResumeOk { .. } => FrameType::ResumeOk,
            Frame::Ext { .. } => FrameType::Ext,
        }
    }

    /// The stream id this frame targets, or 0 for connection-scoped frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::RequestResponse { stream_id, .. }
            | Frame::RequestFnf { stream_id, .. }
            | Frame::RequestStream { stream_id, .. }
            | Frame::RequestChannel { stream_id, .. }
            | Frame::RequestN { stream_id, .. }
            | Frame::Cancel { stream_id }
            | Frame::Payload { stream_id, .. }
            | Frame::Error { stream_id, .. }
            | Frame::Ext { stream_id, .. } => *stream_id,
            Frame::Setup { .. }
            | Frame::Lease { .. }
            | Frame::KeepAlive { .. }
            | Frame::MetadataPush { .. }
            | Frame::Resume { .. }
            | Frame::ResumeOk { .. } => 0,
        }
    }

    /// Whether this frame carries a REQUEST_N-style `initial_request_n`
    /// (REQUEST_STREAM, REQUEST_CHANNEL), saturating the API-level value at
    /// `i64::MAX` the way the wire's signed 32-bit field is interpreted
    /// once it overflows (spec §6, §8 round-trip property).
    pub fn initial_request_n(&self) -> Option<i64> {
        match self {
            Frame::RequestStream {
                initial_request_n, ..
            }
            | Frame::RequestChannel {
                initial_request_n, ..
            } => Some(*initial_request_n),
            _ => None,
        }
    }

    /// Encode this frame into a freshly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.frame_type() as u8);
        let flags = self.flags();
        buf.put_u16(flags.0);

        match self {
            Frame::Setup {
                major_version,
                minor_version,
                keepalive_interval_ms,
                max_lifetime_ms,
                resume_token,
                metadata_mime_type,
                data_mime_type,
                metadata,
                data,
            } => {
                buf.put_u16(*major_version);
                buf.put_u16(*minor_version);
                buf.put_u32(*keepalive_interval_ms);
                buf.put_u32(*max_lifetime_ms);
                if let Some(token) = resume_token {
                    buf.put_u16(token.len() as u16);
                    buf.put_slice(token);
                }
                put_short_string(buf, metadata_mime_type);
                put_short_string(buf, data_mime_type);
                put_metadata_body(buf, metadata);
                buf.put_slice(data);
            }
            Frame::Lease {
                time_to_live_ms,
                number_of_requests,
                metadata,
            } => {
                buf.put_u32(*time_to_live_ms);
                buf.put_u32(*number_of_requests);
                put_metadata_body(buf, metadata);
            }
            Frame::KeepAlive {
                last_received_position,
                data,
                ..
            } => {
                buf.put_u64(*last_received_position);
                buf.put_slice(data);
            }
            Frame::RequestResponse {
                stream_id,
                metadata,
                data,
            } => {
                buf.put_u32(*stream_id);
                put_metadata_body(buf, metadata);
                buf.put_slice(data);
            }
            Frame::RequestFnf {
                stream_id,
                metadata,
                data,
            } => {
                buf.put_u32(*stream_id);
                put_metadata_body(buf, metadata);
                buf.put_slice(data);
            }
            Frame::RequestStream {
                stream_id,
                initial_request_n,
                metadata,
                data,
            } => {
                buf.put_u32(*stream_id);
                buf.put_u32(saturate_to_wire_n(*initial_request_n));
                put_metadata_body(buf, metadata);
                buf.put_slice(data);
            }
            Frame::RequestChannel {
                stream_id,
                initial_request_n,
                metadata,
                data,
                ..
            } => {
                buf.put_u32(*stream_id);
                buf.put_u32(saturate_to_wire_n(*initial_request_n));
                put_metadata_body(buf, metadata);
                buf.put_slice(data);
            }
            Frame::RequestN { stream_id, n } => {
                buf.put_u32(*stream_id);
                buf.put_u32(saturate_to_wire_n(*n));
            }
            Frame::Cancel { stream_id } => {
                buf.put_u32(*stream_id);
            }
            Frame::Payload {
                stream_id,
                metadata,
                data,
                ..
            } => {
                buf.put_u32(*stream_id);
                put_metadata_body(buf, metadata);
                if let Some(data) = data {
                    buf.put_slice(data);
                }
            }
            Frame::Error {
                stream_id,
                error_code,
                message,
            } => {
                buf.put_u32(*stream_id);
                buf.put_u32(*error_code);
                buf.put_slice(message.as_bytes());
            }
            Frame::MetadataPush { metadata } => {
                buf.put_slice(metadata);
            }
            Frame::Resume {
                major_version,
                minor_version,
                resume_token,
                last_received_server_position,
                first_available_client_position,
            } => {
                buf.put_u16(*major_version);
                buf.put_u16(*minor_version);
                buf.put_u16(resume_token.len() as u16);
                buf.put_slice(resume_token);
                buf.put_u64(*last_received_server_position);
                buf.put_u64(*first_available_client_position);
            }
            Frame::ResumeOk {
                last_received_client_position,
            } => {
                buf.put_u64(*last_received_client_position);
            }
            Frame::Ext {
                stream_id,
                extended_type,
                metadata,
                data,
            } => {
                buf.put_u32(*stream_id);
                buf.put_u32(*extended_type);
                put_metadata_body(buf, metadata);
                buf.put_slice(data);
            }
        }
    }

    fn flags(&self) -> Flags {
        match self {
            Frame::Setup {
                resume_token,
                metadata,
                ..
            } => {
                let mut f = Flags::NONE;
                if resume_token.is_some() {
                    f = f | Flags::RESUME_ENABLE;
                }
                f.with(Flags::METADATA, metadata.is_some())
            }
            Frame::Lease { metadata, .. } => Flags::NONE.with(Flags::METADATA, metadata.is_some()),
            Frame::KeepAlive { respond, .. } => Flags::NONE.with(Flags::RESPOND, *respond),
            Frame::RequestResponse { metadata, .. }
            | Frame::RequestFnf { metadata, .. }
            | Frame::RequestStream { metadata, .. }
            | Frame::Ext { metadata, .. } => Flags::NONE.with(Flags::METADATA, metadata.is_some()),
            Frame::RequestChannel {
                metadata, complete, ..
            } => Flags::NONE
                .with(Flags::METADATA, metadata.is_some())
                .with(Flags::COMPLETE, *complete),
            Frame::RequestN { .. } | Frame::Cancel { .. } => Flags::NONE,
            Frame::Payload {
                next,
                complete,
                metadata,
                ..
            } => Flags::NONE
                .with(Flags::NEXT, *next)
                .with(Flags::COMPLETE, *complete)
                .with(Flags::METADATA, metadata.is_some()),
            Frame::Error { .. } => Flags::NONE,
            Frame::MetadataPush { .. } => Flags::METADATA,
            Frame::Resume { .. } | Frame::ResumeOk { .. } => Flags::NONE,
        }
    }

    /// The total number of bytes this frame will occupy when encoded.
    pub fn encoded_len(&self) -> usize {
        let metadata_len = |m: &Option<Bytes>| m.as_ref().map_or(0, |b| 3 + b.len());
        // 1 byte type + 2 bytes flags in every variant.
        3 + match self {
            Frame::Setup {
                resume_token,
                metadata_mime_type,
                data_mime_type,
                metadata,
                data,
                ..
            } => {
                2 + 2 + 4 + 4
                    + resume_token.as_ref().map_or(0, |t| 2 + t.len())
                    + 1
                    + metadata_mime_type.len()
                    + 1
                    + data_mime_type.len()
                    + metadata_len(metadata)
                    + data.len()
            }
            Frame::Lease { metadata, .. } => 4 + 4 + metadata_len(metadata),
            Frame::KeepAlive { data, .. } => 8 + data.len(),
            Frame::RequestResponse { metadata, data, .. } => {
                4 + metadata_len(metadata) + data.len()
            }
            Frame::RequestFnf { metadata, data, .. } => 4 + metadata_len(metadata) + data.len(),
            Frame::RequestStream { metadata, data, .. } => {
                4 + 4 + metadata_len(metadata) + data.len()
            }
            Frame::RequestChannel { metadata, data, .. } => {
                4 + 4 + metadata_len(metadata) + data.len()
            }
            Frame::RequestN { .. } => 4 + 4,
            Frame::Cancel { .. } => 4,
            Frame::Payload { metadata, data, .. } => {
                4 + metadata_len(metadata) + data.as_ref().map_or(0, |d| d.len())
            }
            Frame::Error { message, .. } => 4 + 4 + message.len(),
            Frame::MetadataPush { metadata } => metadata.len(),
            Frame::Resume { resume_token, .. } => 2 + 2 + 2 + resume_token.len() + 8 + 8,
            Frame::ResumeOk { .. } => 8,
            Frame::Ext { metadata, data, .. } => 4 + 4 + metadata_len(metadata) + data.len(),
        }
    }

    /// Decode a frame from the given byte buffer.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        Self::ensure_len(data, 3, "frame header")?;
        let frame_type = FrameType::try_from(data[0])?;
        let flags = Flags((&data[1..3]).get_u16());
        data = &data[3..];

        match frame_type {
            FrameType::Setup => {
                Self::ensure_len(data, 12, "SETUP")?;
                let major_version = (&data[0..2]).get_u16();
                let minor_version = (&data[2..4]).get_u16();
                let keepalive_interval_ms = (&data[4..8]).get_u32();
                let max_lifetime_ms = (&data[8..12]).get_u32();
                let mut data = &data[12..];

                let resume_token = if flags.contains(Flags::RESUME_ENABLE) {
                    Self::ensure_len(data, 2, "SETUP resume token length")?;
                    let len = (&data[0..2]).get_u16() as usize;
                    data = &data[2..];
                    Self::ensure_len(data, len, "SETUP resume token")?;
                    let token = Bytes::copy_from_slice(&data[..len]);
                    data = &data[len..];
                    Some(token)
                } else {
                    None
                };

                let (metadata_mime_type, rest) = take_short_string(data, "SETUP metadata mime")?;
                data = rest;
                let (data_mime_type, rest) = take_short_string(data, "SETUP data mime")?;
                data = rest;

                let (metadata, rest) = take_metadata_body(data, flags)?;
                let payload = Bytes::copy_from_slice(rest);
                Ok(Frame::Setup {
                    major_version,
                    minor_version,
                    keepalive_interval_ms,
                    max_lifetime_ms,
                    resume_token,
                    metadata_mime_type,
                    data_mime_type,
                    metadata,
                    data: payload,
                })
            }
            FrameType::Lease => {
                Self::ensure_len(data, 8, "LEASE")?;
                let time_to_live_ms = (&data[0..4]).get_u32();
                let number_of_requests = (&data[4..8]).get_u32();
                let (metadata, _) = take_metadata_body(&data[8..], flags)?;
                Ok(Frame::Lease {
                    time_to_live_ms,
                    number_of_requests,
                    metadata,
                })
            }
            FrameType::KeepAlive => {
                Self::ensure_len(data, 8, "KEEPALIVE")?;
                let last_received_position = (&data[0..8]).get_u64();
                let payload = Bytes::copy_from_slice(&data[8..]);
                Ok(Frame::KeepAlive {
                    respond: flags.contains(Flags::RESPOND),
                    last_received_position,
                    data: payload,
                })
            }
            FrameType::RequestResponse => {
                Self::ensure_len(data, 4, "REQUEST_RESPONSE")?;
                let stream_id = (&data[0..4]).get_u32();
                let (metadata, rest) = take_metadata_body(&data[4..], flags)?;
                Ok(Frame::RequestResponse {
                    stream_id,
                    metadata,
                    data: Bytes::copy_from_slice(rest),
                })
            }
            FrameType::RequestFnf => {
                Self::ensure_len(data, 4, "REQUEST_FNF")?;
                let stream_id = (&data[0..4]).get_u32();
                let (metadata, rest) = take_metadata_body(&data[4..], flags)?;
                Ok(Frame::RequestFnf {
                    stream_id,
                    metadata,
                    data: Bytes::copy_from_slice(rest),
                })
            }
            FrameType::RequestStream => {
                Self::ensure_len(data, 8, "REQUEST_STREAM")?;
                let stream_id = (&data[0..4]).get_u32();
                let n = (&data[4..8]).get_u32();
                let (metadata, rest) = take_metadata_body(&data[8..], flags)?;
                Ok(Frame::RequestStream {
                    stream_id,
                    initial_request_n: widen_wire_n(n),
                    metadata,
                    data: Bytes::copy_from_slice(rest),
                })
            }
            FrameType::RequestChannel => {
                Self::ensure_len(data, 8, "REQUEST_CHANNEL")?;
                let stream_id = (&data[0..4]).get_u32();
                let n = (&data[4..8]).get_u32();
                let (metadata, rest) = take_metadata_body(&data[8..], flags)?;
                Ok(Frame::RequestChannel {
                    stream_id,
                    initial_request_n: widen_wire_n(n),
                    complete: flags.contains(Flags::COMPLETE),
                    metadata,
                    data: Bytes::copy_from_slice(rest),
                })
            }
            FrameType::RequestN => {
                Self::ensure_len(data, 8, "REQUEST_N")?;
                let stream_id = (&data[0..4]).get_u32();
                let n = (&data[4..8]).get_u32();
                Ok(Frame::RequestN {
                    stream_id,
                    n: widen_wire_n(n),
                })
            }
            FrameType::Cancel => {
                Self::ensure_len(data, 4, "CANCEL")?;
                let stream_id = (&data[0..4]).get_u32();
                Ok(Frame::Cancel { stream_id })
            }
            FrameType::Payload => {
                Self::ensure_len(data, 4, "PAYLOAD")?;
                let stream_id = (&data[0..4]).get_u32();
                let (metadata, rest) = take_metadata_body(&data[4..], flags)?;
                let data = if flags.contains(Flags::NEXT) || !rest.is_empty() {
                    Some(Bytes::copy_from_slice(rest))
                } else {
                    None
                };
                Ok(Frame::Payload {
                    stream_id,
                    next: flags.contains(Flags::NEXT),
                    complete: flags.contains(Flags::COMPLETE),
                    metadata,
                    data,
                })
            }
            FrameType::Error => {
                Self::ensure_len(data, 8, "ERROR")?;
                let stream_id = (&data[0..4]).get_u32();
                let error_code = (&data[4..8]).get_u32();
                let message = String::from_utf8_lossy(&data[8..]).into_owned();
                Ok(Frame::Error {
                    stream_id,
                    error_code,
                    message,
                })
            }
            FrameType::MetadataPush => Ok(Frame::MetadataPush {
                metadata: Bytes::copy_from_slice(data),
            }),
            FrameType::Resume => {
                Self::ensure_len(data, 6, "RESUME")?;
                let major_version = (&data[0..2]).get_u16();
                let minor_version = (&data[2..4]).get_u16();
                let token_len = (&data[4..6]).get_u16() as usize;
                let mut data = &data[6..];
                Self::ensure_len(data, token_len, "RESUME token")?;
                let resume_token = Bytes::copy_from_slice(&data[..token_len]);
                data = &data[token_len..];
                Self::ensure_len(data, 16, "RESUME positions")?;
                let last_received_server_position = (&data[0..8]).get_u64();
                let first_available_client_position = (&data[8..16]).get_u64();
                Ok(Frame::Resume {
                    major_version,
                    minor_version,
                    resume_token,
                    last_received_server_position,
                    first_available_client_position,
                })
            }
            FrameType::ResumeOk => {
                Self::ensure_len(data, 8, "RESUME_OK")?;
                Ok(Frame::ResumeOk {
                    last_received_client_position: (&data[0..8]).get_u64(),
                })
            }
            FrameType::Ext => {
                Self::ensure_len(data, 8, "EXT")?;
                let stream_id = (&data[0..4]).get_u32();
                let extended_type = (&data[4..8]).get_u32();
                let (metadata, rest) = take_metadata_body(&data[8..], flags)?;
                Ok(Frame::Ext {
                    stream_id,
                    extended_type,
                    metadata,
                    data: Bytes::copy_from_slice(rest),
                })
            }
        }
    }

    fn ensure_len(data: &[u8], needed: usize, context: &str) -> Result<()> {
        if data.len() < needed {
            Err(RSocketError::FrameTooShort {
                expected: needed,
                actual: data.len(),
            })
        } else {
            let _ = context;
            Ok(())
        }
    }
}

/// Saturate an API-level `i64` request count down to the wire's unsigned
/// 32-bit field (spec §8: `i32::MAX as i64 + 1` round-trips to `i64::MAX`).
fn saturate_to_wire_n(n: i64) -> u32 {
    n.clamp(0, u32::MAX as i64) as u32
}

fn widen_wire_n(n: u32) -> i64 {
    if n == u32::MAX {
        i64::MAX
    } else {
        n as i64
    }
}

fn put_short_string(buf: &mut BytesMut, s: &str) {
    buf.put_u8(s.len() as u8);
    buf.put_slice(s.as_bytes());
}

fn take_short_string<'a>(data: &'a [u8], context: &str) -> Result<(String, &'a [u8])> {
    Frame::ensure_len(data, 1, context)?;
    let len = data[0] as usize;
    let data = &data[1..];
    Frame::ensure_len(data, len, context)?;
    let s = String::from_utf8_lossy(&data[..len]).into_owned();
    Ok((s, &data[len..]))
}

/// Write a metadata body: a 3-byte length prefix followed by the bytes, only
/// when metadata is `Some` (spec §4.1: `metadata == null` distinguishes "no
/// metadata field" from "empty metadata", which sets the M flag with a
/// zero-length body).
fn put_metadata_body(buf: &mut BytesMut, metadata: &Option<Bytes>) {
    if let Some(metadata) = metadata {
        buf.put_uint(metadata.len() as u64, 3);
        buf.put_slice(metadata);
    }
}

fn take_metadata_body(data: &[u8], flags: Flags) -> Result<(Option<Bytes>, &[u8])> {
    if !flags.contains(Flags::METADATA) {
        return Ok((None, data));
    }
    Frame::ensure_len(data, 3, "metadata length")?;
    let len = (&data[0..3]).get_uint(3) as usize;
    let data = &data[3..];
    Frame::ensure_len(data, len, "metadata body")?;
    Ok((Some(Bytes::copy_from_slice(&data[..len])), &data[len..]))
}
