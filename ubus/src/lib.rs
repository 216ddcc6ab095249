//! Client for OpenWrt's ubus message bus.
//!
//! `ubus` speaks the binary socket protocol of `ubusd`: it performs the
//! HELLO handshake, resolves object paths with LOOKUP (caching the ids),
//! and calls methods with INVOKE, encoding arguments and decoding replies
//! with the blobmsg codec from [`ubus_proto`].
//!
//! # Quick start
//!
//! ```no_run
//! use serde::Deserialize;
//! use ubus::{Args, Client, Transport};
//!
//! #[derive(Deserialize)]
//! struct Board {
//!     hostname: String,
//! }
//!
//! let client = Client::connect()?;
//! let board: Board = client.call("system", "board", Args::none())?.unmarshal()?;
//! println!("{}", board.hostname);
//! # Ok::<(), ubus::Error>(())
//! ```

#[cfg(unix)]
mod client;
mod error;
mod transport;

#[cfg(unix)]
pub use client::{
    Client, ClientBuilder, DEFAULT_DIAL_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_SOCKET,
    DEFAULT_WRITE_TIMEOUT, ObjectInfo,
};
pub use error::{Error, Op, Result};
pub use transport::{Args, Response, Transport};
pub use ubus_proto::{IntoBlobValue, Status, TableBuilder, Value};
