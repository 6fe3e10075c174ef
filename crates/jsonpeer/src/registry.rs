//! # Dispatch Registry
//!
//! Maps method names to handlers. Lookups happen on every inbound call, from
//! many read loops at once, so the table is a `DashMap` and handlers are
//! shared behind `Arc`.
//!
//! ## Invariants
//! - **One Handler Per Name**: Registering an existing name replaces the previous handler.
//! - **Exact Match**: Names are compared byte for byte. No prefixes, no case folding.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::handler::CallContext;
use crate::handler::FnHandler;
use crate::handler::Handler;
use crate::handler::HandlerResult;

#[derive(Default)]
pub struct Registry {
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `method`, returning the handler it replaced.
    pub fn register<H: Handler>(&self, method: impl Into<String>, handler: H) -> Option<Arc<dyn Handler>> {
        let method = method.into();
        tracing::debug!(%method, "registering handler");
        self.handlers.insert(method, Arc::new(handler))
    }

    /// Installs an async closure as the handler for `method`.
    pub fn register_fn<F, Fut>(&self, method: impl Into<String>, f: F) -> Option<Arc<dyn Handler>>
    where
        F: Fn(CallContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(method, FnHandler::new(f))
    }

    pub fn unregister(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.remove(method).map(|(_, handler)| handler)
    }

    pub fn lookup(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("methods", &self.methods()).finish()
    }
}
