//! Error taxonomy for the RSocket connection engine (spec §7).
//!
//! One variant per failure mode the engine can produce, following the
//! teacher's `NexStreamError` shape: a single `thiserror`-derived enum with a
//! `Result<T>` alias, rather than per-module error types.

use thiserror::Error;

/// Wire-level RSocket error codes (spec §6).
pub mod error_code {
    pub const INVALID_SETUP: u32 = 0x0000_0001;
    pub const UNSUPPORTED_SETUP: u32 = 0x0000_0002;
    pub const REJECTED_SETUP: u32 = 0x0000_0003;
    pub const REJECTED_RESUME: u32 = 0x0000_0004;
    pub const CONNECTION_ERROR: u32 = 0x0000_0101;
    pub const CONNECTION_CLOSE: u32 = 0x0000_0102;
    pub const APPLICATION_ERROR: u32 = 0x0000_0201;
    pub const REJECTED: u32 = 0x0000_0202;
    pub const CANCELED: u32 = 0x0000_0203;
    pub const INVALID: u32 = 0x0000_0204;
    pub const CUSTOM_MIN: u32 = 0x0000_0301;
    pub const CUSTOM_MAX: u32 = 0xFFFF_FFFE;
}

/// All errors produced by the RSocket connection engine.
#[derive(Debug, Error)]
pub enum RSocketError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("stream {0} not found")]
    StreamNotFound(u32),

    #[error("stream {0} already exists")]
    StreamAlreadyExists(u32),

    #[error("stream {0} is closed")]
    StreamClosed(u32),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("maximum concurrent streams ({0}) exceeded")]
    MaxStreamsExceeded(u32),

    #[error("invalid stream id: 0x{0:08x}")]
    InvalidStreamId(u32),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// §4.2: synchronous, local, pre-send validation failure.
    #[error("invalid payload")]
    InvalidPayload,

    /// §7.2: the user handler returned/raised an application-level error.
    #[error("application error: {message}")]
    ApplicationError { message: String },

    /// §7.3: a user-specified numeric error code preserved end to end.
    #[error("custom error 0x{code:08x}: {message}")]
    CustomError { code: u32, message: String },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("canceled")]
    Canceled,

    /// §7.4: connection-level rejected-setup error; terminates the connection.
    #[error("setup rejected: {0}")]
    RejectedSetup(String),

    /// §7.4: connection-level lease error; terminates the connection.
    #[error("lease error: {0}")]
    LeaseError(String),

    /// §7.5: protocol violation at stream level (unexpected frame kind,
    /// frame on an invalid/duplicate stream id).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// §7.5: stream-0 protocol violation; terminates the connection.
    #[error("connection-level protocol violation: {0}")]
    ConnectionProtocolViolation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RSocketError {
    /// The wire error code this error would be reported with, if sent to a
    /// peer as an ERROR frame. Returns `None` for errors that never cross
    /// the wire (e.g. purely local stream-table bookkeeping failures).
    pub fn wire_code(&self) -> Option<u32> {
        use error_code::*;
        match self {
            RSocketError::InvalidPayload => Some(INVALID),
            RSocketError::ApplicationError { .. } => Some(APPLICATION_ERROR),
            RSocketError::CustomError { code, .. } => Some(*code),
            RSocketError::Rejected(_) => Some(REJECTED),
            RSocketError::Canceled => Some(CANCELED),
            RSocketError::RejectedSetup(_) => Some(REJECTED_SETUP),
            RSocketError::ProtocolViolation(_) | RSocketError::ConnectionProtocolViolation(_) => {
                Some(CONNECTION_ERROR)
            }
            _ => None,
        }
    }

    /// Reconstruct a typed error from a wire error code and message, the way
    /// a requester decodes an inbound ERROR frame (spec §7, user-visible
    /// error taxonomy).
    pub fn from_wire(code: u32, message: String) -> Self {
        use error_code::*;
        match code {
            APPLICATION_ERROR => RSocketError::ApplicationError { message },
            REJECTED => RSocketError::Rejected(message),
            CANCELED => RSocketError::Canceled,
            INVALID => RSocketError::InvalidPayload,
            REJECTED_SETUP => RSocketError::RejectedSetup(message),
            c if (CUSTOM_MIN..=CUSTOM_MAX).contains(&c) => {
                RSocketError::CustomError { code: c, message }
            }
            c => RSocketError::CustomError { code: c, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, RSocketError>;
