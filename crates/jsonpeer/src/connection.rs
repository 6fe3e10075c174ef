//! # Connection Engine
//!
//! One duplex stream, one read loop, one pending table. Both the client
//! peer and every connection accepted by a server run on this engine; they
//! differ only in where inbound Calls and Notifications go.
//!
//! ## Lifecycle
//!
//! `Disconnected → Connected → Closing → Closed`. `Closed` is terminal. Once
//! a connection leaves `Connected`, new calls and notifications fail with
//! `ConnectionClosed` without touching the stream, and every call still
//! waiting for a reply is resolved with `ConnectionClosed` exactly once.
//!
//! ## Invariants
//! - An id is present in the pending table at most once at any time.
//! - A pending entry is removed exactly once: by its reply, by cancellation,
//!   by timeout, by the caller dropping its future, or by teardown.
//! - At most one frame is being written at any time (the writer sits behind
//!   an async mutex), so concurrent callers never interleave bytes.

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use jsonwire::ErrorObject;
use jsonwire::FrameReader;
use jsonwire::FrameWriter;
use jsonwire::Id;
use jsonwire::Message;

use crate::builder::Config;
use crate::error::Error;
use crate::error::Result;
use crate::transport::BoxReader;
use crate::transport::BoxWriter;
use crate::transport::Transport;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No read loop is running on the stream yet.
    Disconnected,
    Connected,
    /// Shutdown has begun; the write side is being closed.
    Closing,
    Closed,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Disconnected,
            1 => Self::Connected,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// `close()` was called on this side.
    Local,
    /// The peer closed its output cleanly.
    Eof,
    /// The stream failed or the peer sent something unreadable.
    Failed(jsonwire::Error),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "closed locally"),
            Self::Eof => write!(f, "closed by peer"),
            Self::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Receives the messages the read loop cannot resolve on its own.
///
/// Called from the read loop, so implementations must not block; anything
/// that waits (handlers, replies) is spawned.
pub(crate) trait Inbound: Send + Sync + 'static {
    fn on_call(&self, conn: &Connection, id: Id, method: String, params: Option<Value>);
    fn on_notification(&self, conn: &Connection, method: String, params: Option<Value>);
    fn on_closed(&self, conn: &Connection, reason: &CloseReason);
}

type Completion = oneshot::Sender<Result<Value>>;

struct Shared {
    name: String,
    state: AtomicU8,
    writer: Mutex<Option<FrameWriter<BoxWriter>>>,
    pending: DashMap<Id, Completion>,
    next_id: AtomicI64,
    call_timeout: Option<Duration>,
    reason: std::sync::Mutex<Option<CloseReason>>,
    /// Tells the read loop to stop.
    shutdown: CancellationToken,
    /// Abandons a write in flight. Fired when the peer is gone and nobody will read it.
    abort_writes: CancellationToken,
    /// Fires once the connection reaches `Closed`.
    closed: CancellationToken,
}

/// Handle to a live connection. Cloning is cheap; all clones share one stream.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Takes ownership of `transport` and starts the read loop.
    pub(crate) fn open(transport: Transport, config: &Config, inbound: Arc<dyn Inbound>) -> Self {
        let (reader, writer) = transport.into_split();

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state: AtomicU8::new(State::Disconnected as u8),
            writer: Mutex::new(Some(FrameWriter::with_config(writer, &config.framer))),
            pending: DashMap::new(),
            next_id: AtomicI64::new(1),
            call_timeout: config.call_timeout,
            reason: std::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            abort_writes: CancellationToken::new(),
            closed: CancellationToken::new(),
        });

        let conn = Self { shared };
        let reader = FrameReader::with_config(reader, &config.framer);

        conn.shared.state.store(State::Connected as u8, Ordering::SeqCst);
        tracing::info!(peer = %conn.name(), "connection opened");
        tokio::spawn(conn.clone().read_loop(reader, inbound));

        conn
    }

    /// Name used for logging and diagnostics.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> State {
        State::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Resolves once the connection has reached `Closed`.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.reason.lock().ok().and_then(|r| r.clone())
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    // ========================================================================
    //  OUTBOUND
    // ========================================================================

    /// Calls `method` on the peer and waits for its reply.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call_inner(method, params, None).await
    }

    /// Like [`Connection::call`], but resolves with `Cancelled` as soon as
    /// `cancel` fires. A reply arriving afterwards is discarded.
    pub async fn call_with_cancel(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.call_inner(method, params, Some(cancel)).await
    }

    async fn call_inner(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        self.ensure_open()?;

        let (id, rx) = self.register();
        let _guard = PendingGuard { shared: &self.shared, id: id.clone() };

        // Teardown may have drained the table between the check above and the insert.
        self.ensure_open()?;

        let message = Message::Call { id, method: method.to_string(), params };
        self.send(&message).await?;

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.shared.call_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            reply = rx => reply.unwrap_or(Err(Error::ConnectionClosed)),
            _ = cancelled => {
                tracing::debug!(peer = %self.name(), method, "call cancelled");
                Err(Error::Cancelled)
            }
            _ = expired => {
                tracing::debug!(peer = %self.name(), method, "call timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Sends a notification. No reply is expected and none is tracked.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        self.send(&Message::Notification { method: method.to_string(), params }).await
    }

    /// Answers a call received from the peer.
    pub async fn reply(&self, id: Id, result: std::result::Result<Value, ErrorObject>) -> Result<()> {
        self.send(&Message::Reply { id, result }).await
    }

    /// Replies from a background task, for callers that cannot wait.
    pub(crate) fn reply_detached(&self, id: Id, result: std::result::Result<Value, ErrorObject>) {
        let conn = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.reply(id.clone(), result).await {
                tracing::debug!(peer = %conn.name(), %id, error = %e, "reply not delivered");
            }
        });
    }

    /// Shuts the connection down.
    ///
    /// Waits for an in-flight write to finish, closes the write side, and
    /// resolves every outstanding call with `ConnectionClosed` before
    /// returning. Closing an already closed connection is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.teardown(CloseReason::Local).await
    }

    /// Asks the read loop to tear the connection down without waiting.
    pub(crate) fn close_detached(&self) {
        self.record_reason(CloseReason::Local);
        self.shared.shutdown.cancel();
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            State::Connected => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Allocates a fresh id and inserts its pending entry.
    fn register(&self) -> (Id, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();

        loop {
            let n = match self.shared.next_id.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(if n == i64::MAX { 1 } else { n + 1 })
            }) {
                Ok(n) | Err(n) => n,
            };

            let id = Id::Number(n);
            if let Entry::Vacant(slot) = self.shared.pending.entry(id.clone()) {
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    /// Writes one message. Writes are serialized by the writer lock.
    ///
    /// A stream failure closes the connection and reports `ConnectionClosed`,
    /// the same outcome as a call racing the peer's hang-up.
    async fn send(&self, message: &Message) -> Result<()> {
        let mut writer = self.shared.writer.lock().await;
        let Some(framed) = writer.as_mut() else {
            return Err(Error::ConnectionClosed);
        };

        let written = tokio::select! {
            written = framed.write_message(message) => written,
            _ = self.shared.abort_writes.cancelled() => {
                tracing::debug!(peer = %self.name(), kind = message.kind(), "write abandoned, peer is gone");
                return Err(Error::ConnectionClosed);
            }
        };

        if let Err(e) = written {
            drop(writer);
            return match e {
                jsonwire::Error::Io(_) => {
                    tracing::warn!(peer = %self.name(), error = %e, "write failed, closing connection");
                    self.record_reason(CloseReason::Failed(e));
                    self.shared.abort_writes.cancel();
                    self.shared.shutdown.cancel();
                    Err(Error::ConnectionClosed)
                }
                other => Err(Error::Wire(other)),
            };
        }

        tracing::debug!(
            peer = %self.name(),
            kind = message.kind(),
            id = ?message.id(),
            method = ?message.method(),
            "sent"
        );
        Ok(())
    }

    // ========================================================================
    //  INBOUND
    // ========================================================================

    async fn read_loop(self, mut reader: FrameReader<BoxReader>, inbound: Arc<dyn Inbound>) {
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => break CloseReason::Local,
                next = reader.read_message() => next,
            };

            match next {
                Ok(message) => self.route(message, inbound.as_ref()),
                Err(jsonwire::Error::Eof) => break CloseReason::Eof,
                Err(e) => {
                    tracing::warn!(peer = %self.name(), error = %e, "read failed, closing connection");
                    break CloseReason::Failed(e);
                }
            }
        };
        drop(reader);

        if let Err(e) = self.teardown(reason).await {
            tracing::debug!(peer = %self.name(), error = %e, "error while closing write side");
        }

        let reason = self.close_reason().unwrap_or(CloseReason::Local);
        tracing::info!(peer = %self.name(), %reason, "connection closed");
        inbound.on_closed(&self, &reason);
    }

    fn route(&self, message: Message, inbound: &dyn Inbound) {
        tracing::debug!(
            peer = %self.name(),
            kind = message.kind(),
            id = ?message.id(),
            method = ?message.method(),
            "received"
        );

        match message {
            Message::Reply { id, result } => self.complete(id, result),
            Message::Call { id, method, params } => inbound.on_call(self, id, method, params),
            Message::Notification { method, params } => inbound.on_notification(self, method, params),
        }
    }

    /// Resolves the pending call matching `id`, if there still is one.
    fn complete(&self, id: Id, result: std::result::Result<Value, ErrorObject>) {
        let Some((_, tx)) = self.shared.pending.remove(&id) else {
            // Late reply for a cancelled or timed out call, or a confused peer.
            tracing::warn!(peer = %self.name(), %id, "discarding reply for unknown call id");
            return;
        };

        if tx.send(result.map_err(Error::Remote)).is_err() {
            tracing::trace!(peer = %self.name(), %id, "caller went away before its reply arrived");
        }
    }

    // ========================================================================
    //  TEARDOWN
    // ========================================================================

    /// Idempotent. Safe to call from `close()` and from the read loop.
    ///
    /// Pending calls are resolved before the write side is touched, so a
    /// write stuck on a full pipe cannot hold them hostage. A local close
    /// lets the write in flight finish; if the peer is gone it is abandoned.
    async fn teardown(&self, reason: CloseReason) -> Result<()> {
        let peer_gone = !matches!(reason, CloseReason::Local);
        self.record_reason(reason);

        let _ = self.shared.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
            match State::from_u8(s) {
                State::Disconnected | State::Connected => Some(State::Closing as u8),
                _ => None,
            }
        });

        let drained = self.drain_pending();
        if drained > 0 {
            tracing::debug!(peer = %self.name(), drained, "resolved outstanding calls with ConnectionClosed");
        }

        if peer_gone {
            self.shared.abort_writes.cancel();
        }

        let result = {
            let mut writer = self.shared.writer.lock().await;
            match writer.take() {
                Some(mut framed) => framed.shutdown().await.map_err(Error::from),
                None => Ok(()),
            }
        };

        self.shared.state.store(State::Closed as u8, Ordering::SeqCst);
        self.shared.shutdown.cancel();
        self.shared.closed.cancel();

        result
    }

    /// Resolves every pending call with `ConnectionClosed`.
    fn drain_pending(&self) -> usize {
        let ids: Vec<Id> = self.shared.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;

        for id in ids {
            if let Some((_, tx)) = self.shared.pending.remove(&id) {
                let _ = tx.send(Err(Error::ConnectionClosed));
                drained += 1;
            }
        }

        drained
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, n: i64) {
        self.shared.next_id.store(n, Ordering::Relaxed);
    }

    /// First reason wins.
    fn record_reason(&self, reason: CloseReason) {
        if let Ok(mut slot) = self.shared.reason.lock() {
            slot.get_or_insert(reason);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

/// Removes a call's pending entry when the call future finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: Id,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.id);
    }
}
