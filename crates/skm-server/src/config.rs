// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server configuration and the request-handler contract.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default idle period before a worker tears its subprocess down.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-connection receive chunk size.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// A request handler: one decoded JSON value in, one UTF-8 string out.
///
/// A handler error is caught by the server and converted to the literal JSON
/// `null`; the connection stays open.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one decoded request.
    async fn handle(&self, request: Value) -> anyhow::Result<String>;
}

struct SyncHandler<F>(F);

#[async_trait]
impl<F> RequestHandler for SyncHandler<F>
where
    F: Fn(Value) -> anyhow::Result<String> + Send + Sync,
{
    async fn handle(&self, request: Value) -> anyhow::Result<String> {
        (self.0)(request)
    }
}

/// Wrap a synchronous closure as a [`RequestHandler`].
pub fn sync_handler<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Value) -> anyhow::Result<String> + Send + Sync + 'static,
{
    Arc::new(SyncHandler(f))
}

/// Named handler lookup — the search path through which deployments resolve
/// a handler reference from configuration.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn RequestHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a dotted name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolve a handler by its registered name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Settings for a [`CallbackServer`](crate::CallbackServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub address: String,
    /// Listen port (0 picks an ephemeral port).
    pub port: u16,
    /// Cache responses keyed by the canonical request string. Correct only
    /// for pure handlers.
    pub memoized: bool,
    /// Maximum number of memoized entries; `None` means unbounded.
    pub memo_capacity: Option<usize>,
    /// Per-connection receive chunk size.
    pub buffer_size: usize,
    /// Offload handling to the subprocess worker pool.
    pub parallel: bool,
    /// Worker-task count for the pool.
    pub workers: usize,
    /// Idle period after which a worker tears its subprocess down.
    pub worker_idle_timeout: Duration,
    /// Program and arguments of the worker subprocess (parallel mode).
    pub worker_command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 0,
            memoized: true,
            memo_capacity: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            parallel: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            worker_idle_timeout: DEFAULT_WORKER_IDLE_TIMEOUT,
            worker_command: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Settings for `address:port` with defaults everywhere else.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_resolves_by_dotted_name() {
        let mut registry = HandlerRegistry::new();
        registry.register("handlers.echo", sync_handler(|value| Ok(value.to_string())));

        let handler = registry.resolve("handlers.echo").unwrap();
        let response = handler.handle(json!({"a": 1})).await.unwrap();
        assert_eq!(response, "{\"a\":1}");
        assert!(registry.resolve("handlers.missing").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["handlers.echo"]);
    }
}
