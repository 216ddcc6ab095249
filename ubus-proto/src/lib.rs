//! Wire protocol for the OpenWrt ubus message bus.
//!
//! Two layers live here:
//!
//! - the libubox **blob/blobmsg** attribute format ([`blobmsg`], [`blob`]),
//!   used both for protocol fields and for method arguments and replies;
//! - the ubus **message framing** ([`message`]): an 8-byte header followed
//!   by a length-prefixed blob container.
//!
//! All integers on the wire are big-endian and every attribute is padded
//! to a 4-byte boundary.

mod attr;
pub mod blob;
pub mod blobmsg;
mod error;
pub mod message;
mod status;
mod value;

pub use attr::{ATTR_HEADER_LEN, Attr, AttrHeader, AttrIter, MAX_ATTR_LEN, align};
pub use blob::{AttrId, Attrs, BlobBuf};
pub use blobmsg::BlobType;
pub use error::{Error, Result};
pub use message::{
    HEADER_LEN, Header, MAX_MESSAGE_LEN, Message, MessageType, PROTOCOL_VERSION, read_message,
    write_message,
};
pub use status::Status;
pub use value::{IntoBlobValue, TableBuilder, Value};
