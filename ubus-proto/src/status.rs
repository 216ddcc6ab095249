//! ubus status codes.
//!
//! The table is transport-agnostic: the same codes appear in socket STATUS
//! messages and in the numeric error field of the JSON-RPC gateway.

use std::fmt;

/// Status code returned by the daemon or a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum Status {
    /// Success.
    Ok = 0,
    /// The command is not valid for the object.
    InvalidCommand = 1,
    /// An argument was missing or malformed.
    InvalidArgument = 2,
    /// The object has no such method.
    MethodNotFound = 3,
    /// The object or requested entity does not exist.
    NotFound = 4,
    /// The call succeeded but produced no data.
    NoData = 5,
    /// ACLs forbid the call.
    PermissionDenied = 6,
    /// The request timed out on the daemon side.
    Timeout = 7,
    /// The operation is not supported.
    NotSupported = 8,
    /// Unspecified failure.
    UnknownError = 9,
    /// The daemon could not reach the object.
    ConnectionFailed = 10,
}

impl Status {
    /// Looks up a raw code; `None` for codes outside the table.
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::InvalidCommand,
            2 => Self::InvalidArgument,
            3 => Self::MethodNotFound,
            4 => Self::NotFound,
            5 => Self::NoData,
            6 => Self::PermissionDenied,
            7 => Self::Timeout,
            8 => Self::NotSupported,
            9 => Self::UnknownError,
            10 => Self::ConnectionFailed,
            _ => return None,
        })
    }

    /// The raw wire code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "Success",
            Self::InvalidCommand => "Invalid command",
            Self::InvalidArgument => "Invalid argument",
            Self::MethodNotFound => "Method not found",
            Self::NotFound => "Not found",
            Self::NoData => "No response",
            Self::PermissionDenied => "Permission denied",
            Self::Timeout => "Request timed out",
            Self::NotSupported => "Operation not supported",
            Self::UnknownError => "Unknown error",
            Self::ConnectionFailed => "Connection failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_all_codes() {
        for code in 0..=10 {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(Status::from_code(11), None);
        assert_eq!(Status::from_code(u32::MAX), None);
    }

    #[test]
    fn messages() {
        assert_eq!(Status::PermissionDenied.to_string(), "Permission denied");
        assert_eq!(Status::NotFound.to_string(), "Not found");
    }
}
