//! Protocol-level blob attributes of a ubus message body.
//!
//! Unlike blobmsg, these attributes are not named: the 7-bit id says what
//! the field is ([`AttrId`]) and the payload layout follows from it.

use std::fmt;

use crate::attr::{ATTR_HEADER_LEN, Attr, AttrHeader, AttrIter, pad};
use crate::blobmsg;
use crate::error::{Error, Result};
use crate::value::Value;

/// Attribute ids used in ubus message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum AttrId {
    /// Unused.
    Unspec = 0,
    /// Reply status code (`u32`).
    Status = 1,
    /// Object path (string).
    ObjPath = 2,
    /// Object id (`u32`).
    ObjId = 3,
    /// Method name (string).
    Method = 4,
    /// Object type id (`u32`).
    ObjType = 5,
    /// Method signatures (nested blobmsg tables).
    Signature = 6,
    /// Call arguments or reply data (blobmsg table entries).
    Data = 7,
    /// Notification target.
    Target = 8,
    /// Subscriber active flag.
    Active = 9,
    /// Suppress the reply.
    NoReply = 10,
    /// Subscriber list.
    Subscribers = 11,
    /// Caller user name.
    User = 12,
    /// Caller group name.
    Group = 13,
}

impl fmt::Display for AttrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unspec => "unspec",
            Self::Status => "status",
            Self::ObjPath => "objpath",
            Self::ObjId => "objid",
            Self::Method => "method",
            Self::ObjType => "objtype",
            Self::Signature => "signature",
            Self::Data => "data",
            Self::Target => "target",
            Self::Active => "active",
            Self::NoReply => "no_reply",
            Self::Subscribers => "subscribers",
            Self::User => "user",
            Self::Group => "group",
        })
    }
}

/// Builder for a message body (a length-prefixed container of protocol
/// attributes).
///
/// ```
/// use ubus_proto::{AttrId, BlobBuf};
///
/// let mut buf = BlobBuf::new();
/// buf.put_string(AttrId::ObjPath, "system")?;
/// let body = buf.finish()?;
/// assert_eq!(body.len() % 4, 0);
/// # Ok::<(), ubus_proto::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct BlobBuf {
    /// Encoded bytes; the first word is patched by [`BlobBuf::finish`].
    buf: Vec<u8>,
}

impl Default for BlobBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobBuf {
    /// Starts an empty body.
    pub fn new() -> Self {
        Self {
            buf: vec![0; ATTR_HEADER_LEN],
        }
    }

    /// Appends an attribute with a raw payload.
    pub fn put_raw(&mut self, id: AttrId, payload: &[u8]) -> Result<&mut Self> {
        let hdr = AttrHeader::new(id as u8, ATTR_HEADER_LEN + payload.len(), false)?;
        self.buf.extend_from_slice(&hdr.encode());
        self.buf.extend_from_slice(payload);
        pad(&mut self.buf);
        Ok(self)
    }

    /// Appends a big-endian `u32` attribute.
    pub fn put_u32(&mut self, id: AttrId, v: u32) -> Result<&mut Self> {
        self.put_raw(id, &v.to_be_bytes())
    }

    /// Appends a NUL-terminated string attribute.
    pub fn put_string(&mut self, id: AttrId, s: &str) -> Result<&mut Self> {
        let mut payload = Vec::with_capacity(s.len() + 1);
        payload.extend_from_slice(s.as_bytes());
        payload.push(0);
        self.put_raw(id, &payload)
    }

    /// Appends an attribute whose payload is the blobmsg entries of a table.
    pub fn put_table(&mut self, id: AttrId, entries: &[(String, Value)]) -> Result<&mut Self> {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0; ATTR_HEADER_LEN]);
        blobmsg::put_entries(&mut self.buf, entries, 0)?;
        let hdr = AttrHeader::new(id as u8, self.buf.len() - start, false)?;
        self.buf[start..start + ATTR_HEADER_LEN].copy_from_slice(&hdr.encode());
        Ok(self)
    }

    /// Seals the container and returns the encoded body.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let hdr = AttrHeader::new(0, self.buf.len(), false).map_err(|_| Error::Overflow("blob"))?;
        self.buf[..ATTR_HEADER_LEN].copy_from_slice(&hdr.encode());
        Ok(self.buf)
    }
}

/// Parsed protocol attributes of a message body.
///
/// When an id repeats, the last occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct Attrs<'a> {
    /// Attributes in wire order.
    entries: Vec<Attr<'a>>,
}

impl<'a> Attrs<'a> {
    /// Parses a length-prefixed body. An empty body has no attributes.
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        if body.is_empty() {
            return Ok(Self::default());
        }
        let hdr = AttrHeader::parse(body)?;
        let entries = AttrIter::new(&body[ATTR_HEADER_LEN..hdr.len]).collect::<Result<_>>()?;
        Ok(Self { entries })
    }

    /// Whether the body carried no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the raw attribute with the given id.
    pub fn get(&self, id: AttrId) -> Option<&Attr<'a>> {
        self.entries.iter().rev().find(|a| a.id == id as u8 && !a.is_extended())
    }

    /// Reads a `u32` attribute.
    pub fn u32(&self, id: AttrId) -> Result<Option<u32>> {
        self.get(id)
            .map(|a| {
                a.data
                    .first_chunk::<4>()
                    .map(|b| u32::from_be_bytes(*b))
                    .ok_or(Error::BadPayload {
                        kind: "u32",
                        expected: 4,
                        actual: a.data.len(),
                    })
            })
            .transpose()
    }

    /// Reads a string attribute, dropping the NUL terminator.
    pub fn string(&self, id: AttrId) -> Option<String> {
        self.get(id).map(|a| {
            let end = a.data.iter().position(|b| *b == 0).unwrap_or(a.data.len());
            String::from_utf8_lossy(&a.data[..end]).into_owned()
        })
    }

    /// Decodes an attribute whose payload is blobmsg table entries.
    pub fn table(&self, id: AttrId) -> Result<Option<Vec<(String, Value)>>> {
        self.get(id)
            .map(|a| blobmsg::decode_entries(a.data, 0))
            .transpose()
    }

    /// Whether every attribute is a named (blobmsg) one.
    pub fn all_extended(&self) -> bool {
        self.entries.iter().all(Attr::is_extended)
    }

    /// Decodes the whole body as blobmsg table entries.
    pub fn as_table(&self) -> Result<Vec<(String, Value)>> {
        self.entries
            .iter()
            .map(|a| blobmsg::decode_entry(a, 0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TableBuilder;

    #[test]
    fn builds_invoke_body() {
        let Value::Table(args) = TableBuilder::new().field("name", "lan").build() else {
            unreachable!()
        };
        let mut buf = BlobBuf::new();
        buf.put_u32(AttrId::ObjId, 100)
            .unwrap()
            .put_string(AttrId::Method, "status")
            .unwrap()
            .put_table(AttrId::Data, &args)
            .unwrap();
        let body = buf.finish().unwrap();
        assert_eq!(body.len() % 4, 0);
        assert_eq!(
            u32::from_be_bytes(body[..4].try_into().unwrap()) as usize,
            body.len()
        );

        let attrs = Attrs::parse(&body).unwrap();
        assert_eq!(attrs.u32(AttrId::ObjId).unwrap(), Some(100));
        assert_eq!(attrs.string(AttrId::Method).as_deref(), Some("status"));
        assert_eq!(attrs.table(AttrId::Data).unwrap(), Some(args));
        assert_eq!(attrs.u32(AttrId::Status).unwrap(), None);
        assert!(!attrs.all_extended());
    }

    #[test]
    fn wire_layout_of_objid() {
        let mut buf = BlobBuf::new();
        buf.put_u32(AttrId::ObjId, 0x0102_0304).unwrap();
        assert_eq!(
            buf.finish().unwrap(),
            [0, 0, 0, 12, 0x03, 0, 0, 8, 1, 2, 3, 4]
        );
    }

    #[test]
    fn empty_body_has_no_attrs() {
        assert!(Attrs::parse(&[]).unwrap().is_empty());
        assert!(Attrs::parse(&[0, 0, 0, 4]).unwrap().is_empty());
    }

    #[test]
    fn short_u32_payload_is_an_error() {
        let body = [0, 0, 0, 8, 0x01, 0, 0, 4];
        let attrs = Attrs::parse(&body).unwrap();
        assert!(matches!(
            attrs.u32(AttrId::Status),
            Err(Error::BadPayload { .. })
        ));
    }

    #[test]
    fn bare_blobmsg_body_decodes_as_table() {
        let Value::Table(entries) = TableBuilder::new().field("x", 1).build() else {
            unreachable!()
        };
        let body = blobmsg::encode_table(&entries).unwrap();
        let attrs = Attrs::parse(&body).unwrap();
        assert!(attrs.all_extended());
        assert_eq!(attrs.as_table().unwrap(), entries);
    }
}
