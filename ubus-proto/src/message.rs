//! ubus message framing over any `Read`/`Write` stream.
//!
//! Each message is an 8-byte header followed by a blob container:
//!
//! ```text
//! ┌─────────┬────────┬──────────┬───────────┬──────────────┬────────────┐
//! │ version │ type   │ seq      │ peer      │ body length  │ attributes │
//! │ u8      │ u8     │ u16 BE   │ u32 BE    │ u32 BE       │ ...        │
//! └─────────┴────────┴──────────┴───────────┴──────────────┴────────────┘
//! ```
//!
//! The body length counts itself, so an empty body is `00 00 00 04`.

use std::fmt;
use std::io::{Read, Write};

use crate::attr::{ATTR_HEADER_LEN, AttrHeader};
use crate::blob::Attrs;
use crate::error::{Error, Result};

/// Size of the message header in bytes.
pub const HEADER_LEN: usize = 8;

/// Protocol version sent in every header.
pub const PROTOCOL_VERSION: u8 = 0;

/// Largest body accepted from the peer (1 MiB, as in libubus).
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// ubus message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageType {
    /// Sent by the daemon right after connecting; carries the peer id.
    Hello = 0,
    /// Terminates a request with a status code.
    Status = 1,
    /// One chunk of reply data.
    Data = 2,
    /// Keepalive.
    Ping = 3,
    /// Resolve object paths to ids.
    Lookup = 4,
    /// Call a method on an object.
    Invoke = 5,
    /// Publish an object.
    AddObject = 6,
    /// Withdraw an object.
    RemoveObject = 7,
    /// Subscribe to an object's notifications.
    Subscribe = 8,
    /// Cancel a subscription.
    Unsubscribe = 9,
    /// Notification to subscribers.
    Notify = 10,
    /// Bus monitor traffic.
    Monitor = 11,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Hello,
            1 => Self::Status,
            2 => Self::Data,
            3 => Self::Ping,
            4 => Self::Lookup,
            5 => Self::Invoke,
            6 => Self::AddObject,
            7 => Self::RemoveObject,
            8 => Self::Subscribe,
            9 => Self::Unsubscribe,
            10 => Self::Notify,
            11 => Self::Monitor,
            _ => return Err(Error::UnknownMessageType(v)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hello => "HELLO",
            Self::Status => "STATUS",
            Self::Data => "DATA",
            Self::Ping => "PING",
            Self::Lookup => "LOOKUP",
            Self::Invoke => "INVOKE",
            Self::AddObject => "ADD_OBJECT",
            Self::RemoveObject => "REMOVE_OBJECT",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Notify => "NOTIFY",
            Self::Monitor => "MONITOR",
        })
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Message type.
    pub kind: MessageType,
    /// Sequence number.
    pub seq: u16,
    /// Peer id assigned by the daemon.
    pub peer: u32,
}

impl Header {
    /// Creates a header with the current protocol version.
    pub const fn new(kind: MessageType, seq: u16, peer: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            seq,
            peer,
        }
    }

    /// Encodes the header to bytes (big-endian).
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.kind as u8;
        buf[2..4].copy_from_slice(&self.seq.to_be_bytes());
        buf[4..8].copy_from_slice(&self.peer.to_be_bytes());
        buf
    }

    /// Decodes a header, rejecting unknown message types.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        Ok(Self {
            version: buf[0],
            kind: MessageType::try_from(buf[1])?,
            seq: u16::from_be_bytes([buf[2], buf[3]]),
            peer: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The header.
    pub header: Header,
    /// The body including its 4-byte length prefix; empty when the peer
    /// sent a zero length.
    pub body: Vec<u8>,
}

impl Message {
    /// Parses the protocol attributes of the body.
    pub fn attrs(&self) -> Result<Attrs<'_>> {
        Attrs::parse(&self.body)
    }
}

/// Reads one message from `r`.
///
/// An all-zero length word is accepted as "no payload". Lengths of 0 to 3
/// (with other bits set) or above [`MAX_MESSAGE_LEN`] are rejected before
/// any body bytes are read. Exactly `len` bytes are consumed, so an
/// unaligned length does not eat into the next message.
pub fn read_message(r: &mut impl Read) -> Result<Message> {
    let mut hdr = [0u8; HEADER_LEN];
    r.read_exact(&mut hdr)?;
    let header = Header::decode(&hdr)?;

    let mut word = [0u8; ATTR_HEADER_LEN];
    r.read_exact(&mut word)?;
    let raw = u32::from_be_bytes(word);
    if raw == 0 {
        return Ok(Message {
            header,
            body: Vec::new(),
        });
    }
    let len = AttrHeader::from_word(raw).len;
    if len < ATTR_HEADER_LEN || len > MAX_MESSAGE_LEN {
        return Err(Error::BadMessageLength(len));
    }

    // the length is unpadded; the next message starts right after it
    let mut body = vec![0u8; len];
    body[..ATTR_HEADER_LEN].copy_from_slice(&word);
    r.read_exact(&mut body[ATTR_HEADER_LEN..])?;
    Ok(Message { header, body })
}

/// Writes one message to `w` and flushes.
pub fn write_message(w: &mut impl Write, header: &Header, body: &[u8]) -> Result<()> {
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(body);
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}
