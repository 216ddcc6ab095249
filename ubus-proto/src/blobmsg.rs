//! blobmsg encoder and decoder.
//!
//! A blobmsg attribute is an extended blob attribute whose id is the value
//! type. Tables and arrays nest further attributes directly in their
//! payload; array entries carry an empty name.
//!
//! Decoding treats its input as hostile: every length is checked against
//! the bytes actually present and nesting depth is capped, so malformed
//! input yields an [`Error`] rather than a panic.

use crate::attr::{ATTR_HEADER_LEN, Attr, AttrHeader, AttrIter, MAX_ATTR_LEN, pad};
use crate::error::{Error, Result};
use crate::value::Value;

/// Deepest container nesting accepted by the encoder and decoder.
pub const MAX_DEPTH: usize = 64;

/// blobmsg value types (the id field of an extended attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum BlobType {
    /// No payload.
    Unspec = 0,
    /// Unnamed entries.
    Array = 1,
    /// Named entries.
    Table = 2,
    /// NUL-terminated string.
    String = 3,
    /// 64-bit signed integer.
    Int64 = 4,
    /// 32-bit signed integer.
    Int32 = 5,
    /// 16-bit signed integer.
    Int16 = 6,
    /// 8-bit integer, also used for booleans.
    Int8 = 7,
    /// IEEE-754 double.
    Double = 8,
}

impl TryFrom<u8> for BlobType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Unspec,
            1 => Self::Array,
            2 => Self::Table,
            3 => Self::String,
            4 => Self::Int64,
            5 => Self::Int32,
            6 => Self::Int16,
            7 => Self::Int8,
            8 => Self::Double,
            _ => return Err(Error::UnknownType(v)),
        })
    }
}

/// Encodes a table as a length-prefixed blob container.
///
/// An empty table yields the 4-byte word `00 00 00 04`.
pub fn encode_table(entries: &[(String, Value)]) -> Result<Vec<u8>> {
    let mut out = vec![0; ATTR_HEADER_LEN];
    put_entries(&mut out, entries, 0)?;
    seal(out)
}

/// Encodes an array as a length-prefixed blob container.
pub fn encode_array(items: &[Value]) -> Result<Vec<u8>> {
    let mut out = vec![0; ATTR_HEADER_LEN];
    put_items(&mut out, items, 0)?;
    seal(out)
}

/// Encodes one named attribute (name may be empty).
pub fn encode_attr(name: &str, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    put_attr(&mut out, name, value, 0)?;
    Ok(out)
}

/// Decodes a length-prefixed blob container as a table.
pub fn decode_table(buf: &[u8]) -> Result<Vec<(String, Value)>> {
    decode_entries(container_payload(buf)?, 0)
}

/// Decodes a length-prefixed blob container as an array.
pub fn decode_array(buf: &[u8]) -> Result<Vec<Value>> {
    decode_items(container_payload(buf)?, 0)
}

/// Decodes the first attribute in `buf` into its name and value.
pub fn decode_attr(buf: &[u8]) -> Result<(String, Value)> {
    match AttrIter::new(buf).next() {
        Some(attr) => decode_entry(&attr?, 0),
        None => Err(Error::Truncated {
            what: "attribute",
            need: ATTR_HEADER_LEN,
            have: buf.len(),
        }),
    }
}

/// Writes the container length word into `out[..4]`.
fn seal(mut out: Vec<u8>) -> Result<Vec<u8>> {
    if out.len() > MAX_ATTR_LEN {
        return Err(Error::Overflow("blob"));
    }
    let hdr = AttrHeader::new(0, out.len(), false)?;
    out[..ATTR_HEADER_LEN].copy_from_slice(&hdr.encode());
    Ok(out)
}

/// Strips the container length word and returns the attribute region.
fn container_payload(buf: &[u8]) -> Result<&[u8]> {
    let hdr = AttrHeader::parse(buf)?;
    Ok(&buf[ATTR_HEADER_LEN..hdr.len])
}

/// Appends the named entries of a table, sorted by name.
///
/// The sort is stable, so duplicate names keep their relative order.
pub(crate) fn put_entries(out: &mut Vec<u8>, entries: &[(String, Value)], depth: usize) -> Result<()> {
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in sorted {
        put_attr(out, name, value, depth)?;
    }
    Ok(())
}

/// Appends the unnamed entries of an array.
fn put_items(out: &mut Vec<u8>, items: &[Value], depth: usize) -> Result<()> {
    for value in items {
        put_attr(out, "", value, depth)?;
    }
    Ok(())
}

/// Appends one extended attribute. `out` must be 4-byte aligned.
fn put_attr(out: &mut Vec<u8>, name: &str, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }
    let start = out.len();
    out.extend_from_slice(&[0; ATTR_HEADER_LEN]);
    let name_len = u16::try_from(name.len()).map_err(|_| Error::Overflow("attribute name"))?;
    out.extend_from_slice(&name_len.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad(out);

    let kind = match value {
        Value::Null => BlobType::Unspec,
        Value::Bool(b) => {
            out.push(u8::from(*b));
            BlobType::Int8
        }
        Value::Int(i) => put_int(out, *i),
        Value::UInt(u) => put_uint(out, *u),
        Value::Double(d) => {
            out.extend_from_slice(&d.to_bits().to_be_bytes());
            BlobType::Double
        }
        Value::Str(s) => put_str(out, s.as_bytes()),
        Value::Bytes(b) => put_str(out, b),
        Value::Table(entries) => {
            put_entries(out, entries, depth + 1)?;
            BlobType::Table
        }
        Value::Array(items) => {
            put_items(out, items, depth + 1)?;
            BlobType::Array
        }
    };

    let hdr = AttrHeader::new(kind as u8, out.len() - start, true)?;
    out[start..start + ATTR_HEADER_LEN].copy_from_slice(&hdr.encode());
    pad(out);
    Ok(())
}

/// Writes a signed integer in the narrowest of int32/int64.
fn put_int(out: &mut Vec<u8>, v: i64) -> BlobType {
    if let Ok(narrow) = i32::try_from(v) {
        out.extend_from_slice(&narrow.to_be_bytes());
        BlobType::Int32
    } else {
        out.extend_from_slice(&v.to_be_bytes());
        BlobType::Int64
    }
}

/// Writes an unsigned integer: int32 up to `u32::MAX`, int64 above.
fn put_uint(out: &mut Vec<u8>, v: u64) -> BlobType {
    if let Ok(narrow) = u32::try_from(v) {
        out.extend_from_slice(&narrow.to_be_bytes());
        BlobType::Int32
    } else {
        out.extend_from_slice(&v.to_be_bytes());
        BlobType::Int64
    }
}

/// Writes string bytes plus the terminating NUL.
fn put_str(out: &mut Vec<u8>, bytes: &[u8]) -> BlobType {
    out.extend_from_slice(bytes);
    out.push(0);
    BlobType::String
}

/// Decodes every attribute of a table payload.
pub(crate) fn decode_entries(buf: &[u8], depth: usize) -> Result<Vec<(String, Value)>> {
    AttrIter::new(buf)
        .map(|attr| decode_entry(&attr?, depth))
        .collect()
}

/// Decodes every attribute of an array payload, dropping names.
fn decode_items(buf: &[u8], depth: usize) -> Result<Vec<Value>> {
    AttrIter::new(buf)
        .map(|attr| {
            let attr = attr?;
            decode_value(attr.id, attr.data, depth)
        })
        .collect()
}

/// Decodes one attribute into `(name, value)`.
pub(crate) fn decode_entry(attr: &Attr<'_>, depth: usize) -> Result<(String, Value)> {
    let name = attr
        .name
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_default();
    Ok((name, decode_value(attr.id, attr.data, depth)?))
}

/// Decodes a payload according to its type tag.
pub(crate) fn decode_value(kind: u8, data: &[u8], depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }
    Ok(match BlobType::try_from(kind)? {
        BlobType::Unspec => Value::Null,
        BlobType::Table => Value::Table(decode_entries(data, depth + 1)?),
        BlobType::Array => Value::Array(decode_items(data, depth + 1)?),
        BlobType::String => decode_str(data),
        BlobType::Int8 => Value::Int(i64::from(i8::from_be_bytes(fixed(data, "int8")?))),
        BlobType::Int16 => Value::Int(i64::from(i16::from_be_bytes(fixed(data, "int16")?))),
        BlobType::Int32 => Value::Int(i64::from(i32::from_be_bytes(fixed(data, "int32")?))),
        BlobType::Int64 => Value::Int(i64::from_be_bytes(fixed(data, "int64")?)),
        BlobType::Double => Value::Double(f64::from_bits(u64::from_be_bytes(fixed(data, "double")?))),
    })
}

/// Reads the leading `N` bytes of a scalar payload.
fn fixed<const N: usize>(data: &[u8], kind: &'static str) -> Result<[u8; N]> {
    data.first_chunk::<N>().copied().ok_or(Error::BadPayload {
        kind,
        expected: N,
        actual: data.len(),
    })
}

/// Strips alignment words and NUL terminators from a string payload.
fn decode_str(mut data: &[u8]) -> Value {
    while data.len() > ATTR_HEADER_LEN && data[..ATTR_HEADER_LEN] == [0; ATTR_HEADER_LEN] {
        data = &data[ATTR_HEADER_LEN..];
    }
    let end = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let bytes = &data[..end];
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::Str(s.to_owned()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TableBuilder;

    fn roundtrip(value: Value) -> Value {
        let bytes = encode_attr("v", &value).unwrap();
        assert_eq!(bytes.len() % 4, 0, "unaligned encoding of {value:?}");
        let (name, decoded) = decode_attr(&bytes).unwrap();
        assert_eq!(name, "v");
        decoded
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(roundtrip(Value::Null), Value::Null);
        assert_eq!(roundtrip(Value::Bool(true)), Value::Int(1));
        assert_eq!(roundtrip(Value::Bool(false)), Value::Int(0));
        assert_eq!(roundtrip(Value::Str("hello".into())), Value::Str("hello".into()));
        assert_eq!(roundtrip(Value::Str(String::new())), Value::Str(String::new()));
        assert_eq!(roundtrip(Value::Int(-5)), Value::Int(-5));
        assert_eq!(roundtrip(Value::Int(i64::MIN)), Value::Int(i64::MIN));
        assert_eq!(roundtrip(Value::UInt(70_000)), Value::Int(70_000));
        assert_eq!(roundtrip(Value::UInt(u64::from(u32::MAX) + 1)), Value::Int(1 << 32));
    }

    #[test]
    fn doubles_are_bit_exact() {
        for d in [0.0, -0.0, 1.5, f64::MAX, f64::MIN_POSITIVE, f64::INFINITY] {
            let Value::Double(back) = roundtrip(Value::Double(d)) else {
                panic!("expected double");
            };
            assert_eq!(back.to_bits(), d.to_bits());
        }
        let Value::Double(nan) = roundtrip(Value::Double(f64::NAN)) else {
            panic!("expected double");
        };
        assert!(nan.is_nan());
    }

    #[test]
    fn integer_width_selection() {
        let small = encode_attr("", &Value::Int(i64::from(i32::MAX))).unwrap();
        assert_eq!(small[0] & 0x7F, BlobType::Int32 as u8);
        let big = encode_attr("", &Value::Int(i64::from(i32::MAX) + 1)).unwrap();
        assert_eq!(big[0] & 0x7F, BlobType::Int64 as u8);
        let unsigned = encode_attr("", &Value::UInt(u64::from(u32::MAX))).unwrap();
        assert_eq!(unsigned[0] & 0x7F, BlobType::Int32 as u8);
    }

    #[test]
    fn narrow_widths_sign_extend() {
        // int8 -1, int16 -2 as produced by C encoders
        let buf = [
            0x87, 0, 0, 9, 0, 1, b'a', 0, 0xFF, 0, 0, 0, //
            0x86, 0, 0, 10, 0, 1, b'b', 0, 0xFF, 0xFE, 0, 0,
        ];
        let entries = decode_entries(&buf, 0).unwrap();
        assert_eq!(entries[0], ("a".into(), Value::Int(-1)));
        assert_eq!(entries[1], ("b".into(), Value::Int(-2)));
    }

    #[test]
    fn string_payload_is_len_plus_nul() {
        let bytes = encode_attr("", &Value::Str("abc".into())).unwrap();
        let hdr = AttrHeader::parse(&bytes).unwrap();
        // header + name header (2 + 0 + 1, padded to 4) + payload
        assert_eq!(hdr.len - ATTR_HEADER_LEN - 4, "abc".len() + 1);
        assert_eq!(&bytes[8..12], b"abc\0");
    }

    #[test]
    fn empty_containers() {
        assert_eq!(encode_table(&[]).unwrap(), [0, 0, 0, 4]);
        assert_eq!(encode_array(&[]).unwrap(), [0, 0, 0, 4]);
        assert!(decode_table(&[0, 0, 0, 4]).unwrap().is_empty());
        assert!(decode_array(&[0, 0, 0, 4]).unwrap().is_empty());
    }

    #[test]
    fn nested_table_roundtrip() {
        let table = TableBuilder::new()
            .field("hostname", "OpenWrt")
            .field("uptime", 1234u32)
            .field(
                "load",
                vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            )
            .field(
                "memory",
                TableBuilder::new().field("total", 1u64 << 40).field("free", 10i32).build(),
            )
            .field("wifi", false)
            .build();
        let Value::Table(entries) = &table else {
            unreachable!()
        };
        let bytes = encode_table(entries).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        let decoded = decode_table(&bytes).unwrap();

        let back = Value::Table(decoded);
        assert_eq!(back.get("hostname"), Some(&Value::Str("OpenWrt".into())));
        assert_eq!(back.get("uptime"), Some(&Value::Int(1234)));
        assert_eq!(
            back.get("load"),
            Some(&Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        );
        let memory = back.get("memory").unwrap();
        assert_eq!(memory.get("total"), Some(&Value::Int(1 << 40)));
        assert_eq!(memory.get("free"), Some(&Value::Int(10)));
        assert_eq!(back.get("wifi"), Some(&Value::Int(0)));
    }

    #[test]
    fn reflective_struct_roundtrip() {
        #[derive(serde::Serialize)]
        struct Req {
            name: &'static str,
            #[serde(rename = "ifname")]
            device: &'static str,
            up: bool,
        }
        let v = Value::from_serialize(&Req {
            name: "wan",
            device: "eth1",
            up: true,
        })
        .unwrap();
        let Value::Table(entries) = v else {
            panic!("expected table");
        };
        let bytes = encode_table(&entries).unwrap();
        let decoded = Value::Table(decode_table(&bytes).unwrap());
        assert_eq!(decoded.get("ifname").and_then(Value::as_str), Some("eth1"));
        assert_eq!(decoded.get("name").and_then(Value::as_str), Some("wan"));
        assert_eq!(decoded.get("up"), Some(&Value::Int(1)));
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = TableBuilder::new().field("b", 1).field("a", 2).build();
        let b = TableBuilder::new().field("a", 2).field("b", 1).build();
        let (Value::Table(a), Value::Table(b)) = (a, b) else {
            unreachable!()
        };
        assert_eq!(encode_table(&a).unwrap(), encode_table(&b).unwrap());
    }

    #[test]
    fn hand_built_tables_are_written_sorted() {
        let unsorted = vec![
            ("z".to_owned(), Value::Int(1)),
            (
                "a".to_owned(),
                Value::Table(vec![
                    ("y".to_owned(), Value::Bool(true)),
                    ("b".to_owned(), Value::Str("x".into())),
                ]),
            ),
            ("m".to_owned(), Value::Int(2)),
            ("m".to_owned(), Value::Int(3)),
        ];
        let decoded = decode_table(&encode_table(&unsorted).unwrap()).unwrap();
        let names: Vec<_> = decoded.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["a", "m", "m", "z"]);
        assert_eq!(decoded[1].1, Value::Int(2));
        assert_eq!(decoded[2].1, Value::Int(3));
        let Value::Table(inner) = &decoded[0].1 else {
            panic!("expected a nested table");
        };
        assert_eq!(inner[0].0, "b");
        assert_eq!(inner[1].0, "y");
    }

    #[test]
    fn skips_alignment_words_before_nested_values() {
        // table "t" whose payload begins with a zero word, then a string
        // whose payload begins with a zero word
        let inner = [
            0, 0, 0, 0, //
            0x83, 0, 0, 15, 0, 1, b's', 0, 0, 0, 0, 0, b'h', b'i', 0, 0,
        ];
        let mut buf = vec![0x82, 0, 0, 0, 0, 1, b't', 0];
        buf.extend_from_slice(&inner);
        buf[3] = u8::try_from(buf.len()).unwrap();
        let (name, value) = decode_attr(&buf).unwrap();
        assert_eq!(name, "t");
        assert_eq!(value.get("s"), Some(&Value::Str("hi".into())));
    }

    #[test]
    fn non_utf8_strings_become_bytes() {
        let bytes = encode_attr("", &Value::Bytes(vec![0xFF, 0xFE])).unwrap();
        assert_eq!(decode_attr(&bytes).unwrap().1, Value::Bytes(vec![0xFF, 0xFE]));
    }

    #[test]
    fn nesting_is_capped() {
        let mut v = Value::Null;
        for _ in 0..=MAX_DEPTH + 1 {
            v = Value::Array(vec![v]);
        }
        assert!(matches!(encode_attr("", &v), Err(Error::TooDeep(_))));
    }

    #[test]
    fn name_too_long_is_rejected() {
        let name = "x".repeat(usize::from(u16::MAX) + 1);
        assert!(matches!(
            encode_attr(&name, &Value::Null),
            Err(Error::Overflow(_))
        ));
    }

    #[test]
    fn oversized_blob_is_rejected() {
        let big = Value::Bytes(vec![b'a'; MAX_ATTR_LEN]);
        assert!(matches!(encode_attr("", &big), Err(Error::Overflow(_))));
    }

    /// Hand-made malformed inputs; each must be rejected.
    const MALFORMED: &[&[u8]] = &[
        &[],
        &[0, 0],
        &[0, 0, 0, 3],
        &[0, 0, 0, 9, 0, 0, 0, 0],
        &[0xFF, 0xFF, 0xFF, 0xFF],
        // extended attribute, name length runs past the attribute
        &[0, 0, 0, 12, 0x83, 0, 0, 8, 0xFF, 0xFF, 0, 0],
        // extended attribute too short for a name header
        &[0, 0, 0, 9, 0x83, 0, 0, 5, 0, 0, 0, 0],
        // unknown type 0x7F
        &[0, 0, 0, 12, 0xFF, 0, 0, 8, 0, 0, 0, 0],
        // int32 with a 1-byte payload
        &[0, 0, 0, 16, 0x85, 0, 0, 9, 0, 0, 0, 0, 1, 0, 0, 0],
        // double with a 4-byte payload
        &[0, 0, 0, 16, 0x88, 0, 0, 12, 0, 0, 0, 0, 1, 2, 3, 4],
        // nested table whose child overruns its parent
        &[0, 0, 0, 20, 0x82, 0, 0, 16, 0, 0, 0, 0, 0x83, 0, 0, 40, 0, 0, 0, 0],
        // trailing garbage shorter than a header
        &[0, 0, 0, 7, 1, 2, 3],
    ];

    #[test]
    fn malformed_corpus_is_rejected() {
        for (i, sample) in MALFORMED.iter().enumerate() {
            assert!(decode_table(sample).is_err(), "sample {i} decoded");
            assert!(decode_array(sample).is_err(), "sample {i} decoded");
        }
    }

    #[test]
    fn deep_hostile_nesting_is_rejected() {
        // 100 nested empty-named arrays, each claiming to wrap the rest
        let depth = 100;
        let mut buf = Vec::new();
        for level in 0..depth {
            let hdr = AttrHeader::new(BlobType::Array as u8, 8 * (depth - level), true).unwrap();
            buf.extend_from_slice(&hdr.encode());
            buf.extend_from_slice(&[0, 0, 0, 0]);
        }
        let mut framed = (u32::try_from(buf.len() + 4).unwrap()).to_be_bytes().to_vec();
        framed.extend_from_slice(&buf);
        assert!(matches!(decode_array(&framed), Err(Error::TooDeep(_))));
    }

    #[test]
    fn mutated_inputs_never_panic() {
        let table = TableBuilder::new()
            .field("a", "string value")
            .field("b", vec![Value::Int(1), Value::Double(2.5)])
            .field("c", TableBuilder::new().field("d", -7i64).build())
            .build();
        let Value::Table(entries) = table else {
            unreachable!()
        };
        let seed = encode_table(&entries).unwrap();

        // xorshift64; fixed seed keeps the corpus reproducible
        let mut state = 0x2545_F491_4F6C_DD1D_u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        for _ in 0..20_000 {
            let mut sample = seed.clone();
            let flips = 1 + next() % 4;
            for _ in 0..flips {
                let pos = usize::try_from(next() % sample.len() as u64).unwrap();
                sample[pos] = (next() & 0xFF) as u8;
            }
            if next() % 5 == 0 {
                let cut = usize::try_from(next() % sample.len() as u64).unwrap();
                sample.truncate(cut);
            }
            let _ = decode_table(&sample);
            let _ = decode_array(&sample);
        }
    }
}
