//! Generic blobmsg value and conversions into it.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde::Serialize;

use crate::error::Result;

/// A decoded (or to-be-encoded) blobmsg value.
///
/// Decoded tables keep their entries in wire order. The encoder writes
/// table entries sorted by name, so encoding is reproducible whichever
/// way a table was built.
#[derive(Debug, Clone, PartialEq, Default)]
#[non_exhaustive]
pub enum Value {
    /// Unspecified type, no payload.
    #[default]
    Null,
    /// Boolean, encoded as int8 `0`/`1`.
    Bool(bool),
    /// Signed integer. Encoded as int32 when it fits, else int64.
    Int(i64),
    /// Unsigned integer. Values up to `u32::MAX` travel as int32 (ubus
    /// readers treat int32 as `u32`), larger ones as int64.
    UInt(u64),
    /// IEEE-754 double.
    Double(f64),
    /// NUL-terminated string.
    Str(String),
    /// Opaque bytes, encoded like a string. Decoded strings that are not
    /// valid UTF-8 land here.
    Bytes(Vec<u8>),
    /// Named entries. Decoding keeps wire order; encoding writes them
    /// sorted by name.
    Table(Vec<(String, Value)>),
    /// Unnamed entries.
    Array(Vec<Value>),
}

impl Value {
    /// Projects any serializable value into a [`Value`].
    ///
    /// Field names follow serde (`#[serde(rename)]`, `#[serde(skip)]`, ...).
    /// Object keys come out sorted.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Returns the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a signed integer, if it is one and fits.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(i) => Some(i),
            Self::UInt(u) => i64::try_from(u).ok(),
            Self::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    /// Returns the value as a `u32`, reinterpreting a wire int32.
    ///
    /// ubus carries ids and counters as int32 on the wire and reads them
    /// back as unsigned, so `-1` here yields `u32::MAX`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::Int(i) if i32::try_from(i).is_ok() => Some(i as i32 as u32),
            Self::Int(i) => u32::try_from(i).ok(),
            Self::UInt(u) => u32::try_from(u).ok(),
            _ => None,
        }
    }

    /// Returns the double payload, if this is a double.
    pub const fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Double(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up the last entry named `key` in a table.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Table(entries) => entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Converts a table into a map; later duplicates win. `Null` becomes
    /// an empty map. Anything else is returned unchanged as the error.
    pub fn into_map(self) -> std::result::Result<BTreeMap<String, Self>, Self> {
        match self {
            Self::Table(entries) => Ok(entries.into_iter().collect()),
            Self::Null => Ok(BTreeMap::new()),
            other => Err(other),
        }
    }

    /// Short name of the variant for diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Table(_) => "table",
            Self::Array(_) => "array",
        }
    }
}

/// Conversion into a [`Value`], the encode entry point for Rust values.
///
/// Implemented for primitives, strings, byte slices, vectors, options,
/// string-keyed maps and `serde_json::Value`. Structs go through
/// [`Value::from_serialize`] or [`TableBuilder`].
pub trait IntoBlobValue {
    /// Performs the conversion.
    fn into_blob_value(self) -> Value;
}

impl IntoBlobValue for Value {
    fn into_blob_value(self) -> Value {
        self
    }
}

impl IntoBlobValue for () {
    fn into_blob_value(self) -> Value {
        Value::Null
    }
}

impl IntoBlobValue for bool {
    fn into_blob_value(self) -> Value {
        Value::Bool(self)
    }
}

/// Implements [`IntoBlobValue`] for integer types via a lossless widening.
macro_rules! int_into_value {
    ($variant:ident: $wide:ty => $($t:ty),+) => {
        $(
            impl IntoBlobValue for $t {
                fn into_blob_value(self) -> Value {
                    Value::$variant(<$wide>::from(self))
                }
            }
        )+
    };
}

int_into_value!(Int: i64 => i8, i16, i32, i64);
int_into_value!(UInt: u64 => u8, u16, u32, u64);

impl IntoBlobValue for isize {
    fn into_blob_value(self) -> Value {
        i64::try_from(self).map_or(Value::Null, Value::Int)
    }
}

impl IntoBlobValue for usize {
    fn into_blob_value(self) -> Value {
        u64::try_from(self).map_or(Value::Null, Value::UInt)
    }
}

impl IntoBlobValue for f32 {
    fn into_blob_value(self) -> Value {
        Value::Double(f64::from(self))
    }
}

impl IntoBlobValue for f64 {
    fn into_blob_value(self) -> Value {
        Value::Double(self)
    }
}

impl IntoBlobValue for &str {
    fn into_blob_value(self) -> Value {
        Value::Str(self.to_owned())
    }
}

impl IntoBlobValue for String {
    fn into_blob_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoBlobValue for &String {
    fn into_blob_value(self) -> Value {
        Value::Str(self.clone())
    }
}

impl IntoBlobValue for &[u8] {
    fn into_blob_value(self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

impl<T: IntoBlobValue> IntoBlobValue for Option<T> {
    fn into_blob_value(self) -> Value {
        self.map_or(Value::Null, IntoBlobValue::into_blob_value)
    }
}

impl<T: IntoBlobValue> IntoBlobValue for Vec<T> {
    fn into_blob_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoBlobValue::into_blob_value).collect())
    }
}

impl<T: IntoBlobValue> IntoBlobValue for BTreeMap<String, T> {
    fn into_blob_value(self) -> Value {
        Value::Table(
            self.into_iter()
                .map(|(k, v)| (k, v.into_blob_value()))
                .collect(),
        )
    }
}

impl<T: IntoBlobValue, S: BuildHasher> IntoBlobValue for HashMap<String, T, S> {
    fn into_blob_value(self) -> Value {
        let mut entries: Vec<_> = self
            .into_iter()
            .map(|(k, v)| (k, v.into_blob_value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Table(entries)
    }
}

impl IntoBlobValue for serde_json::Value {
    fn into_blob_value(self) -> Value {
        self.into()
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt(u)
                } else {
                    n.as_f64().map_or(Self::Null, Self::Double)
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.into_iter().map(|(k, v)| (k, Self::from(v))).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Self::Table(entries)
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::from(*i),
            Value::UInt(u) => Self::from(*u),
            Value::Double(d) => serde_json::Number::from_f64(*d).map_or(Self::Null, Self::Number),
            Value::Str(s) => Self::String(s.clone()),
            Value::Bytes(b) => Self::String(String::from_utf8_lossy(b).into_owned()),
            Value::Table(entries) => Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
            Value::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
        }
    }
}

/// Explicit field-list builder for table values.
///
/// ```
/// use ubus_proto::{TableBuilder, Value};
///
/// let args = TableBuilder::new()
///     .field("name", "wan")
///     .field("metric", 10u32)
///     .build();
/// assert_eq!(args.get("name"), Some(&Value::Str("wan".into())));
/// ```
#[derive(Debug, Default, Clone)]
#[must_use = "a TableBuilder does nothing until .build() is called"]
pub struct TableBuilder {
    /// Entries in insertion order.
    entries: Vec<(String, Value)>,
}

impl TableBuilder {
    /// Starts an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named field.
    pub fn field(mut self, name: impl Into<String>, value: impl IntoBlobValue) -> Self {
        self.entries.push((name.into(), value.into_blob_value()));
        self
    }

    /// Adds a field only when `value` is `Some`.
    pub fn field_opt<T: IntoBlobValue>(self, name: impl Into<String>, value: Option<T>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    /// Finishes the table, sorting entries by name.
    pub fn build(mut self) -> Value {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Table(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Params {
        #[serde(rename = "interface")]
        iface: String,
        metric: u32,
        #[serde(skip)]
        #[allow(dead_code)]
        internal: bool,
        tags: Vec<&'static str>,
    }

    #[test]
    fn projects_struct_with_serde_tags() {
        let v = Value::from_serialize(&Params {
            iface: "lan".into(),
            metric: 7,
            internal: true,
            tags: vec!["a"],
        })
        .unwrap();
        let Value::Table(entries) = &v else {
            panic!("expected table, got {v:?}");
        };
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["interface", "metric", "tags"]);
        assert_eq!(v.get("metric").and_then(Value::as_i64), Some(7));
        assert_eq!(
            v.get("tags"),
            Some(&Value::Array(vec![Value::Str("a".into())]))
        );
    }

    #[test]
    fn large_json_integers_keep_precision() {
        let json: serde_json::Value = serde_json::from_str(r#"{"n": 18446744073709551615, "m": -9007199254740993}"#).unwrap();
        let v = Value::from(json);
        assert_eq!(v.get("n"), Some(&Value::UInt(u64::MAX)));
        assert_eq!(v.get("m"), Some(&Value::Int(-9_007_199_254_740_993)));
    }

    #[test]
    fn hash_map_entries_are_sorted() {
        let mut m = HashMap::new();
        m.insert("zeta".to_owned(), 1i32);
        m.insert("alpha".to_owned(), 2i32);
        m.insert("mid".to_owned(), 3i32);
        let Value::Table(entries) = m.into_blob_value() else {
            panic!("expected table");
        };
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn u32_view_of_wire_int32() {
        assert_eq!(Value::Int(-1).as_u32(), Some(u32::MAX));
        assert_eq!(Value::Int(100).as_u32(), Some(100));
        assert_eq!(Value::Int(i64::from(u32::MAX) + 1).as_u32(), None);
    }

    #[test]
    fn json_view_of_values() {
        let v = TableBuilder::new()
            .field("up", true)
            .field("nan", f64::NAN)
            .field_opt("none", None::<u8>)
            .field("raw", &b"ab"[..])
            .build();
        let json = serde_json::Value::from(&v);
        assert_eq!(json, serde_json::json!({"up": true, "nan": null, "raw": "ab"}));
    }
}
