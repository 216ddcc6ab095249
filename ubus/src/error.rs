//! Error types for ubus calls.

use std::{fmt, io};

use ubus_proto::Status;

/// Alias for `Result<T, ubus::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The step of a call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Op {
    /// Connecting to the socket.
    Dial,
    /// Waiting for the HELLO message.
    Hello,
    /// Resolving an object path.
    Lookup,
    /// Calling a method.
    Invoke,
    /// Closing the connection.
    Close,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dial => "dial",
            Self::Hello => "hello",
            Self::Lookup => "lookup",
            Self::Invoke => "invoke",
            Self::Close => "close",
        })
    }
}

/// Errors returned by ubus transports.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The socket could not be reached, or the daemon could not reach the
    /// object.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// What was being connected to.
        reason: String,
        /// The underlying I/O error, if any.
        #[source]
        source: Option<io::Error>,
    },

    /// Call arguments were rejected, locally or by the object.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The daemon sent something that violates the protocol.
    #[error("invalid response")]
    InvalidResponse(#[from] ubus_proto::Error),

    /// The object path (or an entity named in the call) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object exists but has no such method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// ACLs forbid the call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A deadline expired.
    #[error("{op} timed out")]
    Timeout {
        /// The step that timed out.
        op: Op,
    },

    /// The operation is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The call succeeded without returning data.
    #[error("no data")]
    NoData,

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,

    /// A status code outside the known table, or the generic error code.
    #[error("unknown ubus error (code {0})")]
    Unknown(u32),

    /// Reading from or writing to the socket failed.
    #[error("{op}: {action} failed")]
    Io {
        /// The step that failed.
        op: Op,
        /// `"read"` or `"write"`.
        action: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The reply could not be decoded into the requested type.
    #[error("cannot decode reply data")]
    Unmarshal(#[from] serde_json::Error),
}

impl Error {
    /// Maps a ubus status code to an error; `None` for success.
    ///
    /// `target` names what was being called and ends up in the message;
    /// `op` is the step reported if the daemon timed out.
    pub fn from_status(code: u32, target: &str, op: Op) -> Option<Self> {
        let Some(status) = Status::from_code(code) else {
            return Some(Self::Unknown(code));
        };
        Some(match status {
            Status::Ok => return None,
            Status::InvalidCommand | Status::InvalidArgument => {
                Self::InvalidParameter(format!("{target}: {status}"))
            }
            Status::MethodNotFound => Self::MethodNotFound(target.to_owned()),
            Status::NotFound => Self::NotFound(target.to_owned()),
            Status::NoData => Self::NoData,
            Status::PermissionDenied => Self::PermissionDenied(target.to_owned()),
            Status::Timeout => Self::Timeout { op },
            Status::NotSupported => Self::NotSupported(target.to_owned()),
            Status::ConnectionFailed => Self::ConnectionFailed {
                reason: target.to_owned(),
                source: None,
            },
            _ => Self::Unknown(code),
        })
    }

    /// Wraps an I/O error, turning expired socket timeouts into [`Error::Timeout`].
    pub(crate) fn io(op: Op, action: &'static str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout { op },
            _ => Self::Io { op, action, source },
        }
    }

    /// Classifies a framing error from a socket read or write.
    pub(crate) fn wire(op: Op, action: &'static str, err: ubus_proto::Error) -> Self {
        match err {
            ubus_proto::Error::Io(source) => Self::io(op, action, source),
            other => Self::InvalidResponse(other),
        }
    }

    /// Whether this error came from a deadline expiring.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
