//! # Peer and Server Builders
//!
//! Fluent setup for the knobs a connection has: a name for logs, framing
//! limits, and an optional per-call timeout.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use jsonwire::FramerConfig;

use crate::handler::CallContext;
use crate::handler::Handler;
use crate::handler::HandlerResult;
use crate::peer::Events;
use crate::peer::Peer;
use crate::registry::Registry;
use crate::server::Server;
use crate::transport::Transport;

/// Settings shared by every connection a builder produces.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub framer: FramerConfig,
    /// `None` waits for replies indefinitely.
    pub call_timeout: Option<Duration>,
    /// Bound on a client peer's queued events. `None` is unbounded.
    pub event_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "peer".to_string(),
            framer: FramerConfig::default(),
            call_timeout: None,
            event_capacity: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PeerBuilder {
    config: Config,
}

impl PeerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_frame_len(mut self, limit: usize) -> Self {
        self.config.framer.max_frame_len = limit;
        self
    }

    pub fn trailing_newline(mut self, enabled: bool) -> Self {
        self.config.framer.trailing_newline = enabled;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Bounds the [`Events`] queue. Once full, notifications are dropped and
    /// calls are refused with `HANDLER_FAILED`.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = Some(capacity);
        self
    }

    /// Takes ownership of `transport` and starts reading from it.
    pub fn connect(self, transport: Transport) -> (Peer, Events) {
        Peer::open(transport, &self.config)
    }
}

#[derive(Debug)]
pub struct ServerBuilder {
    config: Config,
    registry: Registry,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config { name: "server".to_string(), ..Config::default() },
            registry: Registry::new(),
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn max_frame_len(mut self, limit: usize) -> Self {
        self.config.framer.max_frame_len = limit;
        self
    }

    pub fn trailing_newline(mut self, enabled: bool) -> Self {
        self.config.framer.trailing_newline = enabled;
        self
    }

    /// Timeout for calls the server makes back to its clients.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Replaces the registry, discarding handlers added so far.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn handler<H: Handler>(self, method: impl Into<String>, handler: H) -> Self {
        self.registry.register(method, handler);
        self
    }

    pub fn handler_fn<F, Fut>(self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_fn(method, f);
        self
    }

    pub fn build(self) -> Server {
        Server::from_parts(self.config, self.registry)
    }
}
