//! # Method Handlers
//!
//! A handler answers one method. It receives the call's params and a
//! [`CallContext`], and returns either a result value or an error object;
//! the server turns that into the reply.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde_json::Value;

use jsonwire::ErrorObject;
use jsonwire::Id;

use crate::connection::Connection;
use crate::server::ConnectionId;

/// What a handler hands back.
pub type HandlerResult = std::result::Result<Value, ErrorObject>;

#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, cx: CallContext, params: Option<Value>) -> HandlerResult;
}

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(CallContext, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, cx: CallContext, params: Option<Value>) -> HandlerResult {
        (self.f)(cx, params).await
    }
}

/// Per-invocation information given to a handler.
///
/// Cloning shares the close-after-reply flag.
#[derive(Debug, Clone)]
pub struct CallContext {
    conn: Connection,
    connection_id: ConnectionId,
    id: Option<Id>,
    method: String,
    close_after_reply: Arc<AtomicBool>,
}

impl CallContext {
    pub(crate) fn new(conn: Connection, connection_id: ConnectionId, id: Option<Id>, method: String) -> Self {
        Self {
            conn,
            connection_id,
            id,
            method,
            close_after_reply: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The connection the call arrived on. Handlers may call back through it.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The call's id, or `None` for a notification.
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Closes the connection once this call's reply has been written.
    pub fn close_after_reply(&self) {
        self.close_after_reply.store(true, Ordering::SeqCst);
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_after_reply.load(Ordering::SeqCst)
    }
}
