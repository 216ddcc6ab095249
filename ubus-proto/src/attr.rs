//! The 4-byte blob attribute header and a bounds-checked attribute walker.
//!
//! ```text
//! ┌──────────┬────────────┬─────────────────────────┐
//! │ extended │ id / type  │ length (incl. header)   │
//! │ bit 31   │ bits 30-24 │ bits 23-0               │
//! └──────────┴────────────┴─────────────────────────┘
//! ```
//!
//! An extended attribute continues with a `u16` name length, the name,
//! one NUL, and zero padding up to the next 4-byte boundary before the
//! payload starts.

use crate::error::{Error, Result};

/// Size of an attribute header in bytes.
pub const ATTR_HEADER_LEN: usize = 4;

/// Largest length the 24-bit length field can carry.
pub const MAX_ATTR_LEN: usize = 0x00FF_FFFF;

/// Extended (named) attribute flag.
const EXTENDED: u32 = 0x8000_0000;
/// Id/type bits.
const ID_MASK: u32 = 0x7F00_0000;
/// Position of the id/type bits.
const ID_SHIFT: u32 = 24;
/// Length bits.
const LEN_MASK: u32 = 0x00FF_FFFF;

/// Rounds `len` up to the next multiple of 4.
pub const fn align(len: usize) -> usize {
    (len + 3) & !3
}

/// Appends zero bytes until `buf.len()` is a multiple of 4.
pub(crate) fn pad(buf: &mut Vec<u8>) {
    buf.resize(align(buf.len()), 0);
}

/// Decoded attribute header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrHeader {
    /// Attribute id (blob) or value type (blobmsg), 7 bits.
    pub id: u8,
    /// Total attribute length including this header, excluding trailing padding.
    pub len: usize,
    /// Whether a name header follows.
    pub extended: bool,
}

impl AttrHeader {
    /// Builds a header, rejecting lengths the 24-bit field cannot hold.
    pub fn new(id: u8, len: usize, extended: bool) -> Result<Self> {
        if len > MAX_ATTR_LEN {
            return Err(Error::Overflow("attribute"));
        }
        Ok(Self { id, len, extended })
    }

    /// Unpacks a raw header word. No validation against a buffer is done.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_word(word: u32) -> Self {
        Self {
            id: ((word & ID_MASK) >> ID_SHIFT) as u8,
            len: (word & LEN_MASK) as usize,
            extended: word & EXTENDED != 0,
        }
    }

    /// Packs the header into its big-endian wire form.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> [u8; ATTR_HEADER_LEN] {
        let mut word = (u32::from(self.id) << ID_SHIFT) & ID_MASK;
        word |= (self.len as u32) & LEN_MASK;
        if self.extended {
            word |= EXTENDED;
        }
        word.to_be_bytes()
    }

    /// Reads and validates the header at the start of `buf`.
    ///
    /// The declared length must cover at least the header itself and must
    /// not run past the end of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let Some(word) = buf.first_chunk::<ATTR_HEADER_LEN>() else {
            return Err(Error::Truncated {
                what: "attribute header",
                need: ATTR_HEADER_LEN,
                have: buf.len(),
            });
        };
        let hdr = Self::from_word(u32::from_be_bytes(*word));
        if hdr.len < ATTR_HEADER_LEN || hdr.len > buf.len() {
            return Err(Error::BadLength {
                len: hdr.len,
                remaining: buf.len(),
            });
        }
        Ok(hdr)
    }
}

/// One attribute borrowed from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    /// Attribute id or blobmsg type.
    pub id: u8,
    /// Name bytes of an extended attribute (without the NUL).
    pub name: Option<&'a [u8]>,
    /// Payload after the header and the optional name.
    pub data: &'a [u8],
}

impl Attr<'_> {
    /// Whether the attribute carried a name header.
    pub const fn is_extended(&self) -> bool {
        self.name.is_some()
    }
}

/// Walks the attributes of a container payload.
///
/// Zero words between attributes are alignment filler and are skipped.
/// After the first malformed attribute the iterator yields that error and
/// then stops.
#[derive(Debug, Clone)]
pub struct AttrIter<'a> {
    /// Bytes not yet consumed.
    rest: &'a [u8],
    /// Set after an error so iteration terminates.
    failed: bool,
}

impl<'a> AttrIter<'a> {
    /// Iterates the attributes packed in `buf`.
    pub const fn new(buf: &'a [u8]) -> Self {
        Self {
            rest: buf,
            failed: false,
        }
    }

    /// Drops leading all-zero words and a trailing run of zero bytes.
    fn skip_filler(&mut self) {
        while let Some((word, tail)) = self.rest.split_first_chunk::<ATTR_HEADER_LEN>() {
            if *word != [0; ATTR_HEADER_LEN] {
                return;
            }
            self.rest = tail;
        }
        if self.rest.iter().all(|b| *b == 0) {
            self.rest = &[];
        }
    }

    /// Parses the attribute at the cursor and advances past its padding.
    fn step(&mut self) -> Result<Attr<'a>> {
        let hdr = AttrHeader::parse(self.rest)?;
        let raw = &self.rest[ATTR_HEADER_LEN..hdr.len];
        let (name, data) = if hdr.extended {
            let (name, data) = split_name(raw)?;
            (Some(name), data)
        } else {
            (None, raw)
        };
        let next = align(hdr.len).min(self.rest.len());
        self.rest = &self.rest[next..];
        Ok(Attr {
            id: hdr.id,
            name,
            data,
        })
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<Attr<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_filler();
        if self.rest.is_empty() {
            return None;
        }
        let item = self.step();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Splits an extended attribute body into its name and payload.
fn split_name(raw: &[u8]) -> Result<(&[u8], &[u8])> {
    let Some((len, rest)) = raw.split_first_chunk::<2>() else {
        return Err(Error::BadName);
    };
    let name_len = usize::from(u16::from_be_bytes(*len));
    if rest.get(name_len) != Some(&0) {
        return Err(Error::BadName);
    }
    let name = &rest[..name_len];
    let data_start = align(2 + name_len + 1).min(raw.len());
    Ok((name, &raw[data_start..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_word_layout() {
        let hdr = AttrHeader::new(0x7F, 0x12_3456, true).unwrap();
        assert_eq!(hdr.encode(), [0xFF, 0x12, 0x34, 0x56]);
        assert_eq!(AttrHeader::from_word(0xFF12_3456), hdr);

        let plain = AttrHeader::from_word(0x0300_0008);
        assert_eq!(plain.id, 3);
        assert_eq!(plain.len, 8);
        assert!(!plain.extended);
    }

    #[test]
    fn rejects_oversized_length() {
        assert!(matches!(
            AttrHeader::new(1, MAX_ATTR_LEN + 1, false),
            Err(Error::Overflow(_))
        ));
    }

    #[test]
    fn parse_validates_bounds() {
        assert!(matches!(
            AttrHeader::parse(&[0, 0]),
            Err(Error::Truncated { .. })
        ));
        // length 2 < header size
        assert!(matches!(
            AttrHeader::parse(&[0, 0, 0, 2]),
            Err(Error::BadLength { len: 2, .. })
        ));
        // length 12 > 8 available
        assert!(matches!(
            AttrHeader::parse(&[0, 0, 0, 12, 0, 0, 0, 0]),
            Err(Error::BadLength { len: 12, remaining: 8 })
        ));
    }

    #[test]
    fn walks_and_skips_padding_words() {
        let buf = [
            0, 0, 0, 0, // filler
            0x03, 0, 0, 5, b'x', 0, 0, 0, // id 3, one byte payload, padded
            0x81, 0, 0, 11, 0, 2, b'o', b'k', 0, 0, 0, 0, // extended, name "ok"
        ];
        let attrs: Vec<_> = AttrIter::new(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].id, 3);
        assert_eq!(attrs[0].data, b"x");
        assert!(!attrs[0].is_extended());
        assert_eq!(attrs[1].id, 1);
        assert_eq!(attrs[1].name, Some(&b"ok"[..]));
        assert!(attrs[1].data.is_empty());
    }

    #[test]
    fn stops_after_first_error() {
        let buf = [0x03, 0, 0, 40, 1, 2, 3, 4];
        let mut it = AttrIter::new(&buf);
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn name_without_terminator_is_rejected() {
        let buf = [0x83, 0, 0, 8, 0, 2, b'a', b'b'];
        let mut it = AttrIter::new(&buf);
        assert!(matches!(it.next(), Some(Err(Error::BadName))));
    }
}
