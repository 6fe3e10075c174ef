//! # Server Peer
//!
//! Accepts any number of connections and answers their calls from a shared
//! [`Registry`].
//!
//! ## Philosophy
//!
//! - **Always Reply**: Every inbound call gets exactly one reply. Unknown
//!   methods get `METHOD_NOT_FOUND`, failed handlers their error object,
//!   panicking handlers `HANDLER_FAILED`.
//! - **Concurrent Handlers**: Each call runs in its own task, so a slow
//!   handler never holds up the read loop or other calls. Replies go out in
//!   completion order.
//! - **Independent Connections**: A failure on one connection never touches
//!   another.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;

use jsonwire::ErrorObject;
use jsonwire::Id;

use crate::builder::Config;
use crate::builder::ServerBuilder;
use crate::connection::CloseReason;
use crate::connection::Connection;
use crate::connection::Inbound;
use crate::error::Error;
use crate::error::Result;
use crate::handler::CallContext;
use crate::handler::Handler;
use crate::handler::HandlerResult;
use crate::registry::Registry;
use crate::transport::Transport;

/// Identifies one accepted connection for the lifetime of its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct ServerShared {
    config: Config,
    registry: Arc<Registry>,
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
}

impl Drop for ServerShared {
    fn drop(&mut self) {
        for entry in self.connections.iter() {
            entry.value().close_detached();
        }
    }
}

/// A JSON-RPC server. Cheap to clone; clones share connections and registry.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    /// A server with default settings answering from `registry`.
    pub fn new(registry: Registry) -> Self {
        ServerBuilder::new().registry(registry).build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn from_parts(config: Config, registry: Registry) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                registry: Arc::new(registry),
                connections: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The registry calls are answered from. Handlers may be added or
    /// removed while connections are live.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Starts serving `transport` and returns the id of the new connection.
    pub fn accept(&self, transport: Transport) -> ConnectionId {
        let id = ConnectionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

        let mut config = self.shared.config.clone();
        config.name = format!("{}/{}", self.shared.config.name, id);

        let dispatcher = Arc::new(Dispatcher {
            server: Arc::downgrade(&self.shared),
            registry: self.shared.registry.clone(),
            connection_id: id,
        });

        let conn = Connection::open(transport, &config, dispatcher);
        self.shared.connections.insert(id, conn.clone());

        // The read loop may already have finished and tried to deregister.
        if conn.is_closed() {
            self.shared.connections.remove(&id);
        }

        tracing::info!(server = %self.name(), connection = %id, "accepted connection");
        id
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.shared.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Ids of live connections, sorted.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.shared.connections.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Closes one connection. Its outstanding outbound calls fail with
    /// `ConnectionClosed`.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let (_, conn) = self.shared.connections.remove(&id).ok_or(Error::ConnectionClosed)?;
        tracing::debug!(server = %self.name(), connection = %id, "disconnecting");
        conn.close().await
    }

    /// Closes every connection.
    pub async fn shutdown(&self) {
        let ids = self.connection_ids();
        tracing::info!(server = %self.name(), connections = ids.len(), "shutting down");

        for id in ids {
            if let Err(e) = self.disconnect(id).await {
                tracing::debug!(server = %self.name(), connection = %id, error = %e, "error while disconnecting");
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.shared.config.name)
            .field("connections", &self.shared.connections.len())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

// ============================================================================
//  DISPATCH
// ============================================================================

/// Routes one connection's inbound traffic to the registry.
struct Dispatcher {
    server: Weak<ServerShared>,
    registry: Arc<Registry>,
    connection_id: ConnectionId,
}

impl Inbound for Dispatcher {
    fn on_call(&self, conn: &Connection, id: Id, method: String, params: Option<Value>) {
        let Some(handler) = self.registry.lookup(&method) else {
            tracing::debug!(connection = %self.connection_id, %method, %id, "method not found");
            conn.reply_detached(id, Err(ErrorObject::method_not_found()));
            return;
        };

        let cx = CallContext::new(conn.clone(), self.connection_id, Some(id.clone()), method);
        let conn = conn.clone();

        tokio::spawn(async move {
            let result = run_handler(handler, cx.clone(), params).await;

            if let Err(e) = conn.reply(id.clone(), result).await {
                tracing::debug!(peer = %conn.name(), %id, error = %e, "reply not delivered");
            }

            if cx.close_requested() {
                tracing::debug!(peer = %conn.name(), method = %cx.method(), "closing after reply");
                if let Err(e) = conn.close().await {
                    tracing::debug!(peer = %conn.name(), error = %e, "error while closing");
                }
            }
        });
    }

    fn on_notification(&self, conn: &Connection, method: String, params: Option<Value>) {
        let Some(handler) = self.registry.lookup(&method) else {
            tracing::debug!(connection = %self.connection_id, %method, "no handler for notification");
            return;
        };

        let cx = CallContext::new(conn.clone(), self.connection_id, None, method);

        tokio::spawn(async move {
            if let Err(e) = run_handler(handler, cx.clone(), params).await {
                tracing::debug!(method = %cx.method(), error = %e, "notification handler failed");
            }
        });
    }

    fn on_closed(&self, _conn: &Connection, reason: &CloseReason) {
        tracing::debug!(connection = %self.connection_id, %reason, "connection ended");
        if let Some(server) = self.server.upgrade() {
            server.connections.remove(&self.connection_id);
        }
    }
}

/// Runs a handler, turning a panic into a `HANDLER_FAILED` error object.
async fn run_handler(handler: Arc<dyn Handler>, cx: CallContext, params: Option<Value>) -> HandlerResult {
    let method = cx.method().to_string();

    match AssertUnwindSafe(handler.handle(cx, params)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(%method, "handler panicked");
            Err(ErrorObject::handler_failed(format!("Handler for '{}' panicked", method)))
        }
    }
}
