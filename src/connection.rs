//! The pipelined connection core.
//!
//! A [`RedisConnection`] multiplexes concurrently submitted queries from
//! many producers over one server connection. Queries are ordered by a
//! caller-declared priority class, written back-to-back, and their replies
//! are matched to callers purely by position: a FIFO ledger of response
//! actions mirrors the in-flight sequence on the wire, so no per-request
//! correlation ids are needed.
//!
//! Three long-lived tasks drive the connection: a connect loop that
//! (re-)establishes the transport with a fixed retry interval, a write
//! loop that always drains the highest-priority non-suppressed queue
//! next, and a read loop that consumes one reply per ledger unit and
//! routes it to the waiting sink or discards it.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::queue::{Queues, ResponseAction, WriteQueueItem};
use crate::resp;
use crate::transport::{self, RecvHalf, SendHalf};
use crate::types::{Query, QueryPriority, Value};

/// Default read/write buffer size (8 KB).
const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Default delay between connection attempts.
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for connecting to a Redis-compatible server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// UNIX socket path. When set, the UNIX transport is used and
    /// `host`/`port` are ignored.
    pub path: Option<PathBuf>,
    /// Optional password for AUTH.
    pub password: Option<String>,
    /// Database index to SELECT on connect.
    pub database: u8,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
    /// Delay between connection attempts.
    pub retry_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            path: None,
            password: None,
            database: 0,
            buffer_size: DEFAULT_BUF_SIZE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl ConnectionConfig {
    /// Create a config from a `host:port` address.
    pub fn from_addr(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Create a config for a UNIX socket path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Async callback run after every successful connect.
type ConnectedHook<P> =
    Arc<dyn Fn(RedisConnection<P>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A pipelined client connection to a Redis-compatible server.
///
/// The handle is cheap to clone and all methods take `&self`; producers on
/// any task may submit queries concurrently. Call [`start`](Self::start)
/// once from within a Tokio runtime to spawn the connection's tasks; they
/// keep the connection alive for the lifetime of the runtime and
/// transparently re-establish the transport after failures.
///
/// # Examples
///
/// ```ignore
/// use hematite::{ConnectionConfig, QueryPriority, RedisConnection};
/// use hematite::types::query;
///
/// let conn: RedisConnection<Priority> =
///     RedisConnection::new(ConnectionConfig::from_addr("127.0.0.1", 6379));
/// conn.start();
///
/// let pong = conn.execute(query(&["PING"]), Priority::State).await?;
/// ```
pub struct RedisConnection<P: QueryPriority> {
    inner: Arc<Inner<P>>,
}

impl<P: QueryPriority> Clone for RedisConnection<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P: QueryPriority> {
    config: ConnectionConfig,
    /// All queue state; locked only for non-suspending sections.
    queues: Mutex<Queues>,
    /// Writes-pending signal for the write loop.
    queued_writes: Notify,
    /// Reads-pending signal for the read loop.
    queued_reads: Notify,
    /// Wakes the write loop when a fresh send half is published.
    send_ready: Notify,
    /// Wakes the read loop when a fresh receive half is published.
    recv_ready: Notify,
    /// Freshly connected transport halves, tagged with their epoch, until
    /// the respective loop picks them up.
    send_half: Mutex<Option<(u64, SendHalf)>>,
    recv_half: Mutex<Option<(u64, RecvHalf)>>,
    connecting: AtomicBool,
    connected: AtomicBool,
    started: AtomicBool,
    on_connected: Mutex<Option<ConnectedHook<P>>>,
}

impl<P: QueryPriority> RedisConnection<P> {
    /// Create a connection handle. No I/O happens until [`start`](Self::start).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queues: Mutex::new(Queues::new(P::COUNT)),
                queued_writes: Notify::new(),
                queued_reads: Notify::new(),
                send_ready: Notify::new(),
                recv_ready: Notify::new(),
                send_half: Mutex::new(None),
                recv_half: Mutex::new(None),
                connecting: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                started: AtomicBool::new(false),
                on_connected: Mutex::new(None),
            }),
        }
    }

    /// Spawn the connection's tasks and begin connecting.
    ///
    /// Idempotent: repeated calls are no-ops while the connection is live.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(write_loop(Arc::clone(&self.inner)));
            tokio::spawn(read_loop(Arc::clone(&self.inner)));
        }

        if !self.inner.connecting.swap(true, Ordering::SeqCst) {
            tokio::spawn(connect_loop(Arc::clone(&self.inner)));
        }
    }

    /// Whether the transport is currently established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Queue a query for sending, discarding its reply.
    pub fn fire(&self, query: Query, priority: P) {
        debug!(query = %redact(&query), "firing and forgetting query");
        self.enqueue(priority, WriteQueueItem::FireOne(query));
    }

    /// Queue queries for sending, discarding their replies.
    ///
    /// The queries are written back-to-back as one unit.
    pub fn fire_many(&self, queries: Vec<Query>, priority: P) {
        for query in &queries {
            debug!(query = %redact(query), "firing and forgetting query");
        }
        self.enqueue(priority, WriteQueueItem::FireMany(queries));
    }

    /// Queue a query for sending and wait for its reply.
    ///
    /// Protocol-level error replies come back as [`Value::Error`];
    /// an `Err` means the transport failed before the reply arrived.
    pub async fn execute(&self, query: Query, priority: P) -> Result<Value> {
        debug!(query = %redact(&query), "executing query");
        let (sink, reply) = oneshot::channel();
        self.enqueue(priority, WriteQueueItem::AwaitOne(query, sink));
        reply.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Queue queries for sending and wait for all their replies.
    ///
    /// The queries are written back-to-back, so the returned list contains
    /// their replies contiguously and in order, with no interleaving from
    /// other submissions.
    pub async fn execute_many(&self, queries: Vec<Query>, priority: P) -> Result<Vec<Value>> {
        for query in &queries {
            debug!(query = %redact(query), "executing query");
        }
        let (sink, replies) = oneshot::channel();
        self.enqueue(priority, WriteQueueItem::AwaitMany(queries, sink));
        replies.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Exclude a priority class from being drained by the writer.
    ///
    /// Queries of that class still queue up and are sent, in order, once
    /// the class is [`unsuppress`](Self::unsuppress)ed.
    pub fn suppress(&self, priority: P) {
        self.inner.queues.lock().set_suppressed(priority.index(), true);
    }

    /// Allow a suppressed priority class to be drained again.
    pub fn unsuppress(&self, priority: P) {
        self.inner
            .queues
            .lock()
            .set_suppressed(priority.index(), false);
        self.inner.queued_writes.notify_one();
    }

    /// Set a callback that is run after every successful connect.
    ///
    /// The hook receives a handle to this connection and may submit
    /// queries through it (e.g. initial CLIENT SETNAME or cache warmup).
    /// It takes effect from the next (re-)connect.
    pub fn set_on_connected<F, Fut>(&self, hook: F)
    where
        F: Fn(RedisConnection<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ConnectedHook<P> = Arc::new(move |conn| Box::pin(hook(conn)));
        *self.inner.on_connected.lock() = Some(hook);
    }

    fn enqueue(&self, priority: P, item: WriteQueueItem) {
        self.inner.queues.lock().push_write(priority.index(), item);
        self.inner.queued_writes.notify_one();
    }
}

// ── Connect loop ────────────────────────────────────────────────────────────

/// Try to connect until the transport is established, then exit.
///
/// Re-entered (guarded by the `connecting` flag) whenever the writer or
/// reader loses the transport.
async fn connect_loop<P: QueryPriority>(inner: Arc<Inner<P>>) {
    loop {
        match establish(&inner).await {
            Ok((send, recv)) => {
                let (epoch, login) = {
                    let mut queues = inner.queues.lock();
                    queues.epoch += 1;
                    let login = enqueue_login(&inner.config, &mut queues);
                    (queues.epoch, login)
                };
                *inner.send_half.lock() = Some((epoch, send));
                *inner.recv_half.lock() = Some((epoch, recv));
                inner.connected.store(true, Ordering::SeqCst);
                inner.send_ready.notify_one();
                inner.recv_ready.notify_one();
                inner.queued_writes.notify_one();

                info!("connected to Redis server");

                if let Some(replies) = login {
                    if let Err(err) = verify_login(&inner.config, replies).await {
                        error!(error = %err, "Redis login failed");
                    }
                }

                let hook = inner.on_connected.lock().clone();
                if let Some(hook) = hook {
                    hook(RedisConnection {
                        inner: Arc::clone(&inner),
                    })
                    .await;
                }

                break;
            }
            Err(err) => match &inner.config.path {
                Some(path) => {
                    error!(path = %path.display(), error = %err, "cannot connect to Redis server")
                }
                None => {
                    error!(host = %inner.config.host, port = inner.config.port, error = %err,
                        "cannot connect to Redis server")
                }
            },
        }

        sleep(inner.config.retry_interval).await;
    }

    inner
        .connecting
        .store(inner.connected.load(Ordering::SeqCst), Ordering::SeqCst);
}

/// Open the configured transport.
async fn establish<P: QueryPriority>(inner: &Inner<P>) -> Result<(SendHalf, RecvHalf)> {
    let config = &inner.config;

    match &config.path {
        Some(path) => {
            info!(path = %path.display(), "trying to connect to Redis server on unix socket")
        }
        None => info!(host = %config.host, port = config.port, "trying to connect to Redis server"),
    }

    let halves = transport::connect(&config.host, config.port, config.path.as_deref()).await?;
    Ok(halves)
}

/// Queue AUTH (if a password is configured) and SELECT (if the database is
/// non-zero) at the front of the highest-priority class, so they lead the
/// new connection's traffic. Their replies take the normal delivery path
/// like any other query; the returned receiver yields them for
/// [`verify_login`].
fn enqueue_login(
    config: &ConnectionConfig,
    queues: &mut Queues,
) -> Option<oneshot::Receiver<Result<Vec<Value>>>> {
    let mut queries: Vec<Query> = Vec::new();
    if let Some(ref password) = config.password {
        queries.push(vec![
            Bytes::from_static(b"AUTH"),
            Bytes::copy_from_slice(password.as_bytes()),
        ]);
    }
    if config.database != 0 {
        queries.push(vec![
            Bytes::from_static(b"SELECT"),
            Bytes::from(config.database.to_string()),
        ]);
    }
    if queries.is_empty() {
        return None;
    }

    for query in &queries {
        debug!(query = %redact(query), "executing query");
    }
    let (sink, replies) = oneshot::channel();
    queues.push_write_front(0, WriteQueueItem::AwaitMany(queries, sink));
    Some(replies)
}

/// Check the login replies. A failure is reported to the caller but does
/// not tear the connection down.
async fn verify_login(
    config: &ConnectionConfig,
    replies: oneshot::Receiver<Result<Vec<Value>>>,
) -> Result<()> {
    let replies = replies.await.map_err(|_| Error::ConnectionClosed)??;
    let mut replies = replies.into_iter();

    if config.password.is_some() {
        match replies.next() {
            Some(Value::Status(ref s)) if s == "OK" => {}
            Some(Value::Error(e)) => return Err(Error::Auth(e)),
            Some(other) => return Err(Error::Auth(format!("unexpected AUTH reply: {}", other))),
            None => return Err(Error::ConnectionClosed),
        }
    }

    if config.database != 0 {
        match replies.next() {
            Some(Value::Status(ref s)) if s == "OK" => {}
            Some(Value::Error(e)) => return Err(Error::Server(e)),
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "unexpected SELECT reply: {}",
                    other
                )))
            }
            None => return Err(Error::ConnectionClosed),
        }
    }

    Ok(())
}

// ── Write loop ──────────────────────────────────────────────────────────────

/// Send the queries queued by the submission API.
///
/// After every single item the scan restarts from the highest priority, so
/// newly queued higher-priority work preempts lower-priority work between
/// items (never within one item: a batch writes contiguously so its
/// replies stay contiguous on the wire).
async fn write_loop<P: QueryPriority>(inner: Arc<Inner<P>>) {
    let mut send: Option<(u64, SendHalf)> = None;
    let mut write_buf = BytesMut::with_capacity(inner.config.buffer_size);

    loop {
        inner.queued_writes.notified().await;

        loop {
            acquire_send(&inner, &mut send).await;
            let Some((epoch, half)) = send.as_mut() else {
                continue;
            };
            let epoch = *epoch;

            let item = { inner.queues.lock().pop_next_write() };
            let Some(item) = item else { break };

            if !write_item(&inner, half, &mut write_buf, item).await {
                send = None;
                on_transport_error(&inner, epoch);
            }
        }
    }
}

/// Send one queue item and schedule receiving its responses.
///
/// Returns `false` if the transport failed; the item's sink (if any) has
/// then already been failed and no ledger entry was recorded, so the
/// ledger stays consistent with what actually went out on the wire.
async fn write_item<P: QueryPriority>(
    inner: &Arc<Inner<P>>,
    half: &mut SendHalf,
    write_buf: &mut BytesMut,
    item: WriteQueueItem,
) -> bool {
    match item {
        WriteQueueItem::FireOne(query) => {
            if let Err(err) = write_queries(half, write_buf, std::slice::from_ref(&query)).await {
                error!(error = %err, query = %redact(&query),
                    "error sending fired and forgotten query");
                return false;
            }
            inner.queues.lock().record_ignore(1);
        }
        WriteQueueItem::FireMany(queries) => {
            if queries.is_empty() {
                return true;
            }
            if let Err(err) = write_queries(half, write_buf, &queries).await {
                error!(error = %err, count = queries.len(),
                    "error sending fired and forgotten queries");
                return false;
            }
            inner.queues.lock().record_ignore(queries.len());
        }
        WriteQueueItem::AwaitOne(query, sink) => {
            if let Err(err) = write_queries(half, write_buf, std::slice::from_ref(&query)).await {
                let _ = sink.send(Err(err));
                return false;
            }
            let mut queues = inner.queues.lock();
            queues.push_reply_sink(sink);
            queues.record_deliver(1);
        }
        WriteQueueItem::AwaitMany(queries, sink) => {
            if queries.is_empty() {
                let _ = sink.send(Ok(Vec::new()));
                return true;
            }
            let amount = queries.len();
            if let Err(err) = write_queries(half, write_buf, &queries).await {
                let _ = sink.send(Err(err));
                return false;
            }
            let mut queues = inner.queues.lock();
            queues.push_replies_sink(sink);
            queues.record_deliver_bulk(amount);
        }
    }

    inner.queued_reads.notify_one();
    true
}

/// Encode all queries into one buffer and transmit them in a single write.
async fn write_queries(half: &mut SendHalf, buf: &mut BytesMut, queries: &[Query]) -> Result<()> {
    buf.clear();
    for query in queries {
        resp::encode_command(query, buf);
    }
    half.write_all(buf).await?;
    buf.clear();
    Ok(())
}

/// Wait until a send half for the current epoch is held.
async fn acquire_send<P: QueryPriority>(inner: &Arc<Inner<P>>, send: &mut Option<(u64, SendHalf)>) {
    loop {
        {
            let epoch = inner.queues.lock().epoch;
            if let Some((held, _)) = send {
                if *held == epoch {
                    return;
                }
                *send = None;
            }
        }

        let taken = inner.send_half.lock().take();
        if let Some((tag, half)) = taken {
            if tag == inner.queues.lock().epoch {
                *send = Some((tag, half));
                return;
            }
        }

        inner.send_ready.notified().await;
    }
}

// ── Read loop ───────────────────────────────────────────────────────────────

/// Receive the responses to the queries sent by the write loop and route
/// them per the ledger: discard, deliver to a sink, or collect into a
/// bulk list for a list sink.
async fn read_loop<P: QueryPriority>(inner: Arc<Inner<P>>) {
    let mut recv: Option<(u64, RecvHalf)> = None;
    let mut read_buf = BytesMut::with_capacity(inner.config.buffer_size);

    loop {
        inner.queued_reads.notified().await;

        loop {
            let (action, action_epoch) = {
                let mut queues = inner.queues.lock();
                let epoch = queues.epoch;
                (queues.pop_action(), epoch)
            };
            let Some(action) = action else { break };

            acquire_recv(&inner, &mut recv, &mut read_buf).await;
            let Some((half_epoch, mut half)) = recv.take() else {
                break;
            };

            if half_epoch != action_epoch {
                // Popped before a reset: the replies this record describes
                // died with the old transport.
                recv = Some((half_epoch, half));
                continue;
            }

            let ok = match action.action {
                ResponseAction::Ignore => {
                    read_ignored(&mut half, &mut read_buf, action.amount).await
                }
                ResponseAction::Deliver => {
                    read_delivered(&inner, &mut half, &mut read_buf, action.amount).await
                }
                ResponseAction::DeliverBulk => {
                    read_bulk(&inner, &mut half, &mut read_buf, action.amount).await
                }
            };

            if ok {
                recv = Some((half_epoch, half));
            } else {
                on_transport_error(&inner, half_epoch);
            }
        }
    }
}

/// Consume and discard `amount` replies.
async fn read_ignored(half: &mut RecvHalf, buf: &mut BytesMut, amount: usize) -> bool {
    for _ in 0..amount {
        if let Err(err) = read_one(half, buf).await {
            error!(error = %err,
                "error receiving the response to a query which has been fired and forgotten");
            return false;
        }
    }
    true
}

/// Deliver `amount` replies to their individual sinks, in order.
async fn read_delivered<P: QueryPriority>(
    inner: &Arc<Inner<P>>,
    half: &mut RecvHalf,
    buf: &mut BytesMut,
    amount: usize,
) -> bool {
    for _ in 0..amount {
        let sink = { inner.queues.lock().pop_reply_sink() };
        let Some(sink) = sink else {
            // The sinks were failed by a reset that raced this record.
            return false;
        };
        match read_one(half, buf).await {
            Ok(reply) => {
                let _ = sink.send(Ok(reply));
            }
            Err(err) => {
                let _ = sink.send(Err(err));
                return false;
            }
        }
    }
    true
}

/// Collect `amount` replies into one list and deliver it to its list sink.
async fn read_bulk<P: QueryPriority>(
    inner: &Arc<Inner<P>>,
    half: &mut RecvHalf,
    buf: &mut BytesMut,
    amount: usize,
) -> bool {
    let sink = { inner.queues.lock().pop_replies_sink() };
    let Some(sink) = sink else {
        return false;
    };

    let mut replies = Vec::with_capacity(amount);
    for _ in 0..amount {
        match read_one(half, buf).await {
            Ok(reply) => replies.push(reply),
            Err(err) => {
                let _ = sink.send(Err(err));
                return false;
            }
        }
    }

    let _ = sink.send(Ok(replies));
    true
}

/// Read exactly one reply from the transport.
async fn read_one(recv: &mut RecvHalf, buf: &mut BytesMut) -> Result<Value> {
    loop {
        if let Some(value) = resp::decode_value(buf)? {
            return Ok(value);
        }

        let n = recv.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}

/// Wait until a receive half for the current epoch is held.
///
/// Taking a freshly published half clears the read buffer: bytes from a
/// previous transport generation must not be parsed as new replies.
async fn acquire_recv<P: QueryPriority>(
    inner: &Arc<Inner<P>>,
    recv: &mut Option<(u64, RecvHalf)>,
    buf: &mut BytesMut,
) {
    loop {
        {
            let epoch = inner.queues.lock().epoch;
            if let Some((held, _)) = recv {
                if *held == epoch {
                    return;
                }
                *recv = None;
            }
        }

        let taken = inner.recv_half.lock().take();
        if let Some((tag, half)) = taken {
            if tag == inner.queues.lock().epoch {
                buf.clear();
                *recv = Some((tag, half));
                return;
            }
        }

        inner.recv_ready.notified().await;
    }
}

// ── Failure handling ────────────────────────────────────────────────────────

/// Reset the connection after a transport failure observed on `epoch`.
///
/// Idempotent per transport generation: duplicate reports from the writer
/// and reader (or reports about an already-replaced transport) are
/// ignored. Fails every outstanding sink, clears the ledger, drops both
/// halves, and re-enters the connect loop. Queued-but-unsent items stay
/// queued and are written on the next connection; sent commands are not
/// replayed.
fn on_transport_error<P: QueryPriority>(inner: &Arc<Inner<P>>, epoch: u64) {
    {
        let mut queues = inner.queues.lock();
        if queues.epoch != epoch {
            return;
        }
        queues.epoch += 1;
        inner.connected.store(false, Ordering::SeqCst);
        queues.fail_outstanding();
    }

    error!("Redis connection lost, failing outstanding queries");

    *inner.send_half.lock() = None;
    *inner.recv_half.lock() = None;

    inner.connecting.store(true, Ordering::SeqCst);
    tokio::spawn(connect_loop(Arc::clone(inner)));
}

// ── Query redaction ─────────────────────────────────────────────────────────

/// Render a query for logging: at most the first 7 arguments, each
/// truncated to 61 bytes with an ellipsis, overflow marked by `...`.
fn redact(query: &Query) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for (i, arg) in query.iter().enumerate() {
        if i == 7 {
            out.push_str(" ...");
            break;
        }
        if i > 0 {
            out.push(' ');
        }
        if arg.len() > 64 {
            let _ = write!(out, "'{}...'", String::from_utf8_lossy(&arg[..61]));
        } else {
            let _ = write!(out, "'{}'", String::from_utf8_lossy(arg));
        }
    }
    out
}
