//! Error types for blob encoding, decoding, and message framing.

use crate::blob::AttrId;
use crate::message::MessageType;

/// Alias for `Result<T, ubus_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while encoding or decoding ubus wire data.
///
/// Decoding never panics on malformed input; every violation surfaces as
/// one of these variants.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An attribute header declared a length outside `4..=remaining`.
    #[error("attribute length {len} out of bounds ({remaining} bytes available)")]
    BadLength {
        /// Length declared by the header.
        len: usize,
        /// Bytes actually available.
        remaining: usize,
    },

    /// The buffer ended before a fixed-size field could be read.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        /// The field being read.
        what: &'static str,
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// An extended attribute carried a malformed name header.
    #[error("malformed attribute name")]
    BadName,

    /// A scalar payload is shorter than its type requires.
    #[error("{kind} payload needs {expected} bytes, got {actual}")]
    BadPayload {
        /// The scalar type.
        kind: &'static str,
        /// Minimum payload size.
        expected: usize,
        /// Actual payload size.
        actual: usize,
    },

    /// The blobmsg type tag is not one this codec knows.
    #[error("unknown blobmsg type {0}")]
    UnknownType(u8),

    /// Containers are nested deeper than the decoder allows.
    #[error("containers nested deeper than {0} levels")]
    TooDeep(usize),

    /// A computed length does not fit the 24-bit attribute length field.
    #[error("length overflow while encoding {0}")]
    Overflow(&'static str),

    /// The message header carried an unknown type code.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// The message body length prefix is implausible.
    #[error("invalid message length {0}")]
    BadMessageLength(usize),

    /// A message of the wrong type arrived.
    #[error("unexpected {got} message, expected {expected}")]
    UnexpectedMessage {
        /// The type the protocol requires at this point.
        expected: MessageType,
        /// The type that arrived.
        got: MessageType,
    },

    /// A required protocol attribute is absent.
    #[error("missing {0} attribute")]
    MissingAttr(AttrId),

    /// Conversion through `serde_json` failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Reading or writing the underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
