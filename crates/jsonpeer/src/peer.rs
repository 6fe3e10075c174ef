//! # Client Peer
//!
//! The outbound side of a connection: issue calls and notifications, and
//! receive whatever the other side sends unprompted as a stream of [`Event`]s.
//!
//! ## Philosophy
//!
//! - **Symmetric**: A client peer can answer calls too. Incoming calls are
//!   delivered as `Event::Call` and answered with [`Peer::reply`].
//! - **Never Leave a Call Hanging**: If nobody is listening for events, an
//!   incoming call is answered with `METHOD_NOT_FOUND` automatically.
//! - **Owned Lifetime**: Dropping the last `Peer` handle closes the connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jsonwire::ErrorObject;
use jsonwire::Id;

use crate::builder::Config;
use crate::builder::PeerBuilder;
use crate::connection::CloseReason;
use crate::connection::Connection;
use crate::connection::Inbound;
use crate::connection::State;
use crate::error::Result;
use crate::transport::Transport;

/// Something the remote side did that no local call was waiting for.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The remote called a method on us. Answer with [`Peer::reply`].
    Call {
        id: Id,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// The connection ended. Always the last event.
    Closed(CloseReason),
}

/// Stream of [`Event`]s for one peer. Ends after `Event::Closed`.
///
/// By default the queue behind it is unbounded: a peer that keeps `Events`
/// alive but never polls it buffers every inbound notification. Use
/// [`PeerBuilder::event_capacity`] to bound it; once full, notifications are
/// dropped and calls are answered with `HANDLER_FAILED`.
#[derive(Debug)]
pub struct Events {
    rx: EventReceiver,
}

#[derive(Debug)]
enum EventReceiver {
    Unbounded(mpsc::UnboundedReceiver<Event>),
    Bounded(mpsc::Receiver<Event>),
}

impl Events {
    pub async fn recv(&mut self) -> Option<Event> {
        match &mut self.rx {
            EventReceiver::Unbounded(rx) => rx.recv().await,
            EventReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

impl futures::Stream for Events {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        match &mut self.rx {
            EventReceiver::Unbounded(rx) => rx.poll_recv(cx),
            EventReceiver::Bounded(rx) => rx.poll_recv(cx),
        }
    }
}

enum EventSender {
    Unbounded(mpsc::UnboundedSender<Event>),
    Bounded(mpsc::Sender<Event>),
}

/// Why an event did not make it into the queue.
enum Undelivered {
    NoListener(Event),
    Full(Event),
}

fn event_channel(capacity: Option<usize>) -> (EventSender, EventReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (EventSender::Bounded(tx), EventReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (EventSender::Unbounded(tx), EventReceiver::Unbounded(rx))
        }
    }
}

impl EventSender {
    fn try_send(&self, event: Event) -> std::result::Result<(), Undelivered> {
        match self {
            Self::Unbounded(tx) => tx.send(event).map_err(|e| Undelivered::NoListener(e.0)),
            Self::Bounded(tx) => tx.try_send(event).map_err(|e| match e {
                mpsc::error::TrySendError::Full(event) => Undelivered::Full(event),
                mpsc::error::TrySendError::Closed(event) => Undelivered::NoListener(event),
            }),
        }
    }

    /// Delivers `event` once the listener makes room.
    fn send_later(&self, event: Event) {
        if let Self::Bounded(tx) = self {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }
}

/// Forwards inbound traffic to the peer's event stream.
struct EventSink {
    tx: EventSender,
}

impl Inbound for EventSink {
    fn on_call(&self, conn: &Connection, id: Id, method: String, params: Option<Value>) {
        match self.tx.try_send(Event::Call { id, method, params }) {
            Ok(()) => {}
            Err(Undelivered::NoListener(Event::Call { id, method, .. })) => {
                tracing::debug!(peer = %conn.name(), %method, %id, "no event listener, answering method-not-found");
                conn.reply_detached(id, Err(ErrorObject::method_not_found()));
            }
            Err(Undelivered::Full(Event::Call { id, method, .. })) => {
                tracing::warn!(peer = %conn.name(), %method, %id, "event queue full, refusing call");
                conn.reply_detached(id, Err(ErrorObject::handler_failed("Event queue is full")));
            }
            Err(_) => {}
        }
    }

    fn on_notification(&self, conn: &Connection, method: String, params: Option<Value>) {
        match self.tx.try_send(Event::Notification { method, params }) {
            Ok(()) => {}
            Err(Undelivered::NoListener(_)) => {
                tracing::trace!(peer = %conn.name(), "no event listener, dropping notification");
            }
            Err(Undelivered::Full(_)) => {
                tracing::warn!(peer = %conn.name(), "event queue full, dropping notification");
            }
        }
    }

    fn on_closed(&self, _conn: &Connection, reason: &CloseReason) {
        if let Err(Undelivered::Full(event)) = self.tx.try_send(Event::Closed(reason.clone())) {
            self.tx.send_later(event);
        }
    }
}

/// Client side of a duplex JSON-RPC connection.
///
/// Cheap to clone. The connection closes when the last clone is dropped or
/// when [`Peer::close`] is called.
#[derive(Clone, Debug)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

#[derive(Debug)]
struct PeerInner {
    conn: Connection,
}

impl Drop for PeerInner {
    fn drop(&mut self) {
        if !self.conn.is_closed() {
            self.conn.close_detached();
        }
    }
}

impl Peer {
    /// Connects over `transport` with default settings.
    pub fn connect(transport: Transport) -> (Self, Events) {
        PeerBuilder::new().connect(transport)
    }

    pub fn builder() -> PeerBuilder {
        PeerBuilder::new()
    }

    pub(crate) fn open(transport: Transport, config: &Config) -> (Self, Events) {
        let (tx, rx) = event_channel(config.event_capacity);
        let conn = Connection::open(transport, config, Arc::new(EventSink { tx }));

        let peer = Self { inner: Arc::new(PeerInner { conn }) };
        (peer, Events { rx })
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    pub fn name(&self) -> &str {
        self.inner.conn.name()
    }

    /// Calls `method` and waits for the reply.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.inner.conn.call(method, params).await
    }

    /// Calls `method`, giving up with `Cancelled` if `cancel` fires first.
    pub async fn call_with_cancel(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.inner.conn.call_with_cancel(method, params, cancel).await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.inner.conn.notify(method, params).await
    }

    /// Answers an `Event::Call`.
    pub async fn reply(&self, id: Id, result: std::result::Result<Value, ErrorObject>) -> Result<()> {
        self.inner.conn.reply(id, result).await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.conn.close().await
    }

    pub async fn closed(&self) {
        self.inner.conn.closed().await
    }

    pub fn state(&self) -> State {
        self.inner.conn.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.conn.is_closed()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.conn.pending_count()
    }
}
