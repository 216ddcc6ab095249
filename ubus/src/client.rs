//! Unix-socket transport to `ubusd`.
//!
//! One [`Client`] owns one connection. Calls are serialized by a mutex
//! around the socket and the sequence counter, because DATA/STATUS replies
//! carry nothing that ties them to a particular request. Object ids are
//! cached per path behind a separate read/write lock and are never
//! invalidated for the lifetime of the connection.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Read};
use std::net::Shutdown;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{Dispatch, debug, trace};
use ubus_proto::{AttrId, BlobBuf, Header, Message, MessageType, Value};

use crate::error::{Error, Op, Result};
use crate::transport::{Args, Response, Transport};

/// Default `ubusd` socket path.
pub const DEFAULT_SOCKET: &str = "/tmp/run/ubus/ubus.sock";

/// Default bound on connecting to the socket.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Default bound on waiting for each message. Generous because some
/// methods (wireless scans) take a long time to answer.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on each socket write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Builder for a [`Client`].
///
/// ```no_run
/// use std::time::Duration;
/// use ubus::Client;
///
/// let client = Client::builder()
///     .socket("/var/run/ubus/ubus.sock")
///     .read_timeout(Duration::from_secs(10))
///     .connect()?;
/// # Ok::<(), ubus::Error>(())
/// ```
#[derive(Debug, Clone)]
#[must_use = "a ClientBuilder does nothing until .connect() is called"]
pub struct ClientBuilder {
    /// Socket path.
    socket: PathBuf,
    /// Bound on connecting.
    dial_timeout: Duration,
    /// Bound on each incoming message.
    read_timeout: Duration,
    /// Bound on each write.
    write_timeout: Duration,
    /// Subscriber for this client's diagnostics.
    logger: Option<Dispatch>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            logger: None,
        }
    }
}

impl ClientBuilder {
    /// Sets the socket path (default: [`DEFAULT_SOCKET`]).
    pub fn socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket = path.into();
        self
    }

    /// Sets the connect timeout (default: 3 s).
    pub const fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the per-message read timeout (default: 60 s).
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout (default: 3 s). Zero disables it.
    pub const fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Routes diagnostics to `logger` instead of the global subscriber.
    pub fn logger(mut self, logger: Dispatch) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Connects and completes the HELLO handshake.
    pub fn connect(self) -> Result<Client> {
        let logger = self.logger.clone();
        scoped(logger.as_ref(), || {
            let stream = dial(&self.socket, self.dial_timeout)?;
            let write_timeout = (!self.write_timeout.is_zero()).then_some(self.write_timeout);
            stream
                .set_write_timeout(write_timeout)
                .map_err(|e| Error::io(Op::Dial, "configure", e))?;

            let mut conn = Conn {
                stream: Some(stream),
                seq: 0,
            };
            let hello = conn.recv(self.read_timeout, Op::Hello)?;
            if hello.header.kind != MessageType::Hello {
                return Err(ubus_proto::Error::UnexpectedMessage {
                    expected: MessageType::Hello,
                    got: hello.header.kind,
                }
                .into());
            }
            let peer = hello.header.peer;
            debug!(
                socket = %self.socket.display(),
                peer = format_args!("{peer:#010x}"),
                "connected to ubusd"
            );

            Ok(Client {
                socket: self.socket,
                peer,
                read_timeout: self.read_timeout,
                conn: Mutex::new(conn),
                objects: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                logger: self.logger,
            })
        })
    }
}

/// An object reported by LOOKUP.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ObjectInfo {
    /// Object path, e.g. `network.interface.lan`.
    pub path: String,
    /// Daemon-assigned object id.
    pub id: u32,
    /// Object type id, if reported.
    pub type_id: Option<u32>,
    /// Method signatures: a table of method name to a table of argument
    /// name to blobmsg type code.
    pub signature: Option<Value>,
}

impl ObjectInfo {
    /// Extracts an object description from a LOOKUP DATA reply.
    fn from_message(msg: &Message) -> Result<Self> {
        let attrs = msg.attrs()?;
        let path = attrs
            .string(AttrId::ObjPath)
            .ok_or(ubus_proto::Error::MissingAttr(AttrId::ObjPath))?;
        let id = attrs
            .u32(AttrId::ObjId)?
            .ok_or(ubus_proto::Error::MissingAttr(AttrId::ObjId))?;
        Ok(Self {
            path,
            id,
            type_id: attrs.u32(AttrId::ObjType)?,
            signature: attrs.table(AttrId::Signature)?.map(Value::Table),
        })
    }
}

/// A connection to `ubusd`.
#[derive(Debug)]
pub struct Client {
    /// Socket path, for diagnostics.
    socket: PathBuf,
    /// Peer id from HELLO, echoed in every message sent.
    peer: u32,
    /// Bound on each incoming message.
    read_timeout: Duration,
    /// Socket and sequence counter; held for a whole request/reply exchange.
    conn: Mutex<Conn>,
    /// Object path to id.
    objects: RwLock<HashMap<String, u32>>,
    /// Set by [`Transport::close`].
    closed: AtomicBool,
    /// Subscriber for this client's diagnostics.
    logger: Option<Dispatch>,
}

/// The socket and the state that must change with it.
#[derive(Debug)]
struct Conn {
    /// `None` once closed.
    stream: Option<UnixStream>,
    /// Sequence number of the last message sent.
    seq: u16,
}

impl Conn {
    /// Returns the open stream.
    fn stream(&mut self) -> Result<&mut UnixStream> {
        self.stream.as_mut().ok_or(Error::Closed)
    }

    /// Sends a message with the next sequence number.
    fn send(&mut self, kind: MessageType, peer: u32, body: &[u8], op: Op) -> Result<()> {
        let seq = self.seq.wrapping_add(1);
        let header = Header::new(kind, seq, peer);
        ubus_proto::write_message(self.stream()?, &header, body)
            .map_err(|e| Error::wire(op, "write", e))?;
        self.seq = seq;
        trace!(%kind, seq, len = body.len(), "sent");
        Ok(())
    }

    /// Receives one message, giving up once `timeout` has elapsed.
    fn recv(&mut self, timeout: Duration, op: Op) -> Result<Message> {
        let mut reader = Deadline {
            stream: self.stream()?,
            deadline: Instant::now() + timeout,
        };
        let msg = ubus_proto::read_message(&mut reader).map_err(|e| Error::wire(op, "read", e))?;
        trace!(kind = %msg.header.kind, seq = msg.header.seq, len = msg.body.len(), "received");
        Ok(msg)
    }
}

/// A reader that enforces one deadline across all reads of a message.
struct Deadline<'a> {
    /// The socket.
    stream: &'a mut UnixStream,
    /// When the whole message must have arrived.
    deadline: Instant,
}

impl Read for Deadline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.read(buf)
    }
}

impl Client {
    /// Connects to the default socket with default timeouts.
    pub fn connect() -> Result<Self> {
        ClientBuilder::default().connect()
    }

    /// Returns a builder for custom socket paths and timeouts.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The peer id assigned by the daemon in HELLO.
    pub const fn peer_id(&self) -> u32 {
        self.peer
    }

    /// The socket path this client is connected to.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves an object path to its id, using the cache when possible.
    pub fn lookup_id(&self, path: &str) -> Result<u32> {
        scoped(self.logger.as_ref(), || self.resolve(path))
    }

    /// Lists objects matching `pattern` (all objects when `None`).
    ///
    /// ubusd accepts a trailing `*` wildcard. Every object returned is added
    /// to the id cache.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<ObjectInfo>> {
        scoped(self.logger.as_ref(), || {
            self.ensure_open()?;
            self.lookup(pattern)
        })
    }

    /// Fails fast once closed, without touching the socket.
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Locks the connection. A poisoned lock still guards a usable socket.
    fn conn(&self) -> MutexGuard<'_, Conn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache lookup, falling back to LOOKUP on a miss.
    fn resolve(&self, path: &str) -> Result<u32> {
        self.ensure_open()?;
        let cached = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied();
        if let Some(id) = cached {
            trace!(path, objid = id, "object id cache hit");
            return Ok(id);
        }

        self.lookup(Some(path))?
            .iter()
            .find(|o| o.path == path)
            .map(|o| o.id)
            .ok_or_else(|| Error::NotFound(path.to_owned()))
    }

    /// Sends one request and reads replies up to and including its STATUS,
    /// passing each DATA message to `on_data`; returns the status code.
    ///
    /// A DATA message that fails to decode does not end the exchange early:
    /// the STATUS is still consumed so the next request starts in sync, and
    /// the first decode error is returned in its place.
    fn exchange(
        &self,
        kind: MessageType,
        body: &[u8],
        op: Op,
        mut on_data: impl FnMut(&Message) -> Result<()>,
    ) -> Result<u32> {
        let mut conn = self.conn();
        conn.send(kind, self.peer, body, op)?;
        let mut malformed = None;
        loop {
            let msg = conn.recv(self.read_timeout, op)?;
            match msg.header.kind {
                MessageType::Data if malformed.is_none() => {
                    if let Err(e) = on_data(&msg) {
                        debug!(%op, seq = msg.header.seq, error = %e, "malformed reply");
                        malformed = Some(e);
                    }
                }
                MessageType::Data => {}
                MessageType::Status => {
                    let status = status_code(&msg);
                    return match malformed {
                        Some(e) => Err(e),
                        None => status,
                    };
                }
                other => debug!(%op, kind = %other, "ignoring message"),
            }
        }
    }

    /// Runs one LOOKUP exchange and caches every object it reports.
    fn lookup(&self, pattern: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let mut body = BlobBuf::new();
        if let Some(p) = pattern {
            body.put_string(AttrId::ObjPath, p)
                .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        }
        let body = body
            .finish()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;

        let mut objects = Vec::new();
        let status = self.exchange(MessageType::Lookup, &body, Op::Lookup, |msg| {
            objects.push(ObjectInfo::from_message(msg)?);
            Ok(())
        })?;

        let target = pattern.unwrap_or("*");
        if let Some(err) = Error::from_status(status, target, Op::Lookup) {
            debug!(path = target, status, "lookup failed");
            return Err(err);
        }
        debug!(path = target, found = objects.len(), "lookup complete");

        let mut cache = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        for o in &objects {
            cache.insert(o.path.clone(), o.id);
        }
        Ok(objects)
    }

    /// Runs one INVOKE exchange and merges the DATA replies.
    fn invoke(&self, service: &str, method: &str, args: Args) -> Result<Response> {
        self.ensure_open()?;
        let data: Vec<(String, Value)> = args.into_map()?.into_iter().collect();
        let objid = self.resolve(service)?;

        let mut body = BlobBuf::new();
        body.put_u32(AttrId::ObjId, objid)
            .and_then(|b| b.put_string(AttrId::Method, method))
            .and_then(|b| b.put_table(AttrId::Data, &data))
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        let body = body
            .finish()
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;

        let mut result = BTreeMap::new();
        let status = self.exchange(MessageType::Invoke, &body, Op::Invoke, |msg| {
            merge_data(&mut result, msg)
        })?;

        let target = format!("{service}.{method}");
        if let Some(err) = Error::from_status(status, &target, Op::Invoke) {
            debug!(%target, objid, status, "call failed");
            return Err(err);
        }
        debug!(%target, objid, entries = result.len(), "call complete");
        Ok(Response::new(result))
    }
}

impl Transport for Client {
    fn call(&self, service: &str, method: &str, args: Args) -> Result<Response> {
        scoped(self.logger.as_ref(), || self.invoke(service, method, args))
    }

    fn set_logger(&mut self, logger: Dispatch) {
        self.logger = Some(logger);
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let Some(stream) = self.conn().stream.take() else {
            return Ok(());
        };
        match stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => {
                Err(Error::io(Op::Close, "shutdown", e))
            }
            _ => Ok(()),
        }
    }
}

/// Checks the socket path, then connects within `timeout`.
fn dial(path: &Path, timeout: Duration) -> Result<UnixStream> {
    let meta = fs::metadata(path).map_err(|e| Error::ConnectionFailed {
        reason: format!("{}: cannot stat socket", path.display()),
        source: Some(e),
    })?;
    if !meta.file_type().is_socket() {
        return Err(Error::ConnectionFailed {
            reason: format!("{}: not a socket", path.display()),
            source: None,
        });
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(|e| Error::io(Op::Dial, "start runtime", e))?;
    let stream = rt.block_on(async {
        let stream = tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| Error::Timeout { op: Op::Dial })?
            .map_err(|e| Error::ConnectionFailed {
                reason: format!("{}: connect", path.display()),
                source: Some(e),
            })?;
        stream.into_std().map_err(|e| Error::io(Op::Dial, "detach", e))
    })?;
    stream
        .set_nonblocking(false)
        .map_err(|e| Error::io(Op::Dial, "configure", e))?;
    Ok(stream)
}

/// Extracts the status code of a STATUS message. An empty body counts as
/// success.
fn status_code(msg: &Message) -> Result<u32> {
    let attrs = msg.attrs()?;
    if attrs.is_empty() {
        return Ok(0);
    }
    Ok(attrs
        .u32(AttrId::Status)?
        .ok_or(ubus_proto::Error::MissingAttr(AttrId::Status))?)
}

/// Merges the payload of one DATA reply into `out`.
///
/// The payload is the nested data attribute; a body made only of blobmsg
/// attributes is taken as the payload itself.
fn merge_data(out: &mut BTreeMap<String, Value>, msg: &Message) -> Result<()> {
    let attrs = msg.attrs()?;
    let entries = match attrs.table(AttrId::Data)? {
        Some(entries) => entries,
        None if attrs.all_extended() => attrs.as_table()?,
        None => {
            debug!("DATA reply without a data attribute");
            return Ok(());
        }
    };
    out.extend(entries);
    Ok(())
}

/// Runs `f` with `logger` as the default subscriber, if one is set.
fn scoped<T>(logger: Option<&Dispatch>, f: impl FnOnce() -> T) -> T {
    match logger {
        Some(d) => tracing::dispatcher::with_default(d, f),
        None => f(),
    }
}
