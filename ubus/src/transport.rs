//! The transport and result contracts shared by every ubus backend.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Dispatch;
use ubus_proto::Value;

use crate::error::{Error, Result};

/// A connection able to call ubus methods.
///
/// Implementations serialize calls internally, so a transport can be
/// shared between threads behind an `Arc`.
pub trait Transport: Send + Sync {
    /// Calls `method` on the object at path `service`.
    fn call(&self, service: &str, method: &str, args: Args) -> Result<Response>;

    /// Routes this transport's diagnostics to `logger` instead of the
    /// global `tracing` subscriber.
    fn set_logger(&mut self, logger: Dispatch);

    /// Closes the transport. Later calls fail with [`Error::Closed`].
    fn close(&self) -> Result<()>;
}

/// Call arguments, normalized into a string-keyed table when the call is
/// made.
///
/// ```
/// use ubus::{Args, TableBuilder};
///
/// let _ = Args::none();
/// let _ = Args::json(r#"{"name": "lan"}"#);
/// let _ = Args::from(TableBuilder::new().field("name", "lan").build());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Args(Raw);

/// Argument forms accepted before normalization.
#[derive(Debug, Clone, Default)]
enum Raw {
    /// No arguments.
    #[default]
    None,
    /// An already-built table.
    Map(BTreeMap<String, Value>),
    /// A blob value; must be a table or null.
    Value(Value),
    /// JSON text that must decode to an object or null.
    Json(Vec<u8>),
    /// A serialization failure, reported when the call is made.
    Invalid(String),
}

impl Args {
    /// No arguments (an empty table on the wire).
    pub fn none() -> Self {
        Self(Raw::None)
    }

    /// JSON-encoded arguments, as text or bytes.
    pub fn json(text: impl Into<Vec<u8>>) -> Self {
        Self(Raw::Json(text.into()))
    }

    /// Arguments projected from any serializable value.
    ///
    /// Struct fields follow serde naming (`#[serde(rename)]`,
    /// `#[serde(skip)]`). Integers keep full 64-bit precision.
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match Value::from_serialize(value) {
            Ok(v) => Self(Raw::Value(v)),
            Err(e) => Self(Raw::Invalid(e.to_string())),
        }
    }

    /// Normalizes into the table sent as the INVOKE data attribute.
    pub(crate) fn into_map(self) -> Result<BTreeMap<String, Value>> {
        match self.0 {
            Raw::None => Ok(BTreeMap::new()),
            Raw::Map(map) => Ok(map),
            Raw::Value(v) => table_from(v),
            Raw::Json(bytes) => {
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Ok(BTreeMap::new());
                }
                let json: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::InvalidParameter(format!("arguments are not JSON: {e}")))?;
                table_from(json.into())
            }
            Raw::Invalid(msg) => Err(Error::InvalidParameter(msg)),
        }
    }
}

/// Requires a table (or null) for call arguments.
fn table_from(v: Value) -> Result<BTreeMap<String, Value>> {
    v.into_map().map_err(|other| {
        Error::InvalidParameter(format!("arguments must be a table, got {}", other.kind()))
    })
}

impl From<BTreeMap<String, Value>> for Args {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(Raw::Map(map))
    }
}

impl From<Value> for Args {
    fn from(v: Value) -> Self {
        Self(Raw::Value(v))
    }
}

impl From<serde_json::Value> for Args {
    fn from(v: serde_json::Value) -> Self {
        Self(Raw::Value(v.into()))
    }
}

/// The reply of a successful call: DATA payloads merged into one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Merged reply entries.
    data: BTreeMap<String, Value>,
}

impl Response {
    /// Wraps merged reply data.
    pub const fn new(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }

    /// Decodes the reply into `T`.
    ///
    /// Fails with [`Error::NoData`] when the call returned nothing.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T> {
        if self.data.is_empty() {
            return Err(Error::NoData);
        }
        Ok(serde_json::from_value(self.to_json())?)
    }

    /// Whether the call returned no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns one top-level entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// All top-level entries.
    pub const fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Consumes the response, returning its entries.
    pub fn into_data(self) -> BTreeMap<String, Value> {
        self.data
    }

    /// The reply as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                .collect(),
        )
    }
}
