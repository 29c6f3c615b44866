// SPDX-License-Identifier: MIT OR Apache-2.0
//! The callback TCP server.

use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{RequestHandler, ServerConfig};
use crate::error::ServerError;
use crate::launcher::SubprocessLauncher;
use crate::pool::WorkerPool;

/// Receives framed-JSON requests, memoizes responses, and dispatches either
/// inline or through the subprocess worker pool.
pub struct CallbackServer {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
}

/// What each connection task needs to dispatch requests.
struct Shared {
    handler: Arc<dyn RequestHandler>,
    pool: Option<WorkerPool>,
    memo: Option<Mutex<HashMap<String, String>>>,
    memo_capacity: Option<usize>,
    buffer_size: usize,
}

impl CallbackServer {
    /// A server for `config` dispatching to `handler`.
    ///
    /// In parallel mode the handler is only the in-process fallback; real
    /// work runs in subprocesses spawned from `config.worker_command`.
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self { config, handler }
    }

    /// Bind the listener and start serving in the background.
    pub async fn bind(self) -> Result<RunningServer, ServerError> {
        let address = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address,
            source,
        })?;

        let cancel = CancelToken::new();
        let pool = if self.config.parallel {
            let launcher =
                SubprocessLauncher::start(self.config.worker_command.clone(), cancel.clone())?;
            Some(WorkerPool::start(
                self.config.workers,
                self.config.worker_idle_timeout,
                Arc::new(launcher),
                cancel.clone(),
            ))
        } else {
            None
        };

        let shared = Arc::new(Shared {
            handler: self.handler,
            pool,
            memo: self.config.memoized.then(|| Mutex::new(HashMap::new())),
            memo_capacity: self.config.memo_capacity,
            buffer_size: self.config.buffer_size.max(1),
        });

        info!(%local_addr, parallel = shared.pool.is_some(), "callback server listening");
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&shared), cancel.clone()));

        Ok(RunningServer {
            local_addr,
            cancel,
            accept,
            shared,
        })
    }

    /// Serve until `SIGINT` or `SIGTERM`, then shut down gracefully.
    pub async fn serve(self) -> Result<(), ServerError> {
        let running = self.bind().await?;
        let mut interrupt =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .map_err(ServerError::WorkerIo)?;
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(ServerError::WorkerIo)?;
        tokio::select! {
            _ = interrupt.recv() => info!("SIGINT received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
        running.shutdown().await;
        Ok(())
    }
}

/// A bound, serving callback server.
pub struct RunningServer {
    local_addr: SocketAddr,
    cancel: CancelToken,
    accept: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl RunningServer {
    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The server's cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Number of live worker subprocesses (0 without a pool).
    pub fn live_workers(&self) -> usize {
        self.shared
            .pool
            .as_ref()
            .map(WorkerPool::live_workers)
            .unwrap_or(0)
    }

    /// Stop accepting, cancel client tasks, and tear down the worker pool.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.accept.await;
        if let Ok(shared) = Arc::try_unwrap(self.shared).map_err(|_| ()) {
            if let Some(pool) = shared.pool {
                pool.shutdown().await;
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancelToken) {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connected");
                    clients.spawn(run_client(stream, Arc::clone(&shared), cancel.clone()));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                }
            },
        }
    }
    // Client tasks watch the same token; wait for them to unwind.
    while clients.join_next().await.is_some() {}
}

/// Serve one connection: accumulate bytes, decode one JSON value at a time,
/// dispatch, write the response. Undecodable input keeps accumulating; the
/// client's read deadline is its own concern.
async fn run_client(mut stream: TcpStream, shared: Arc<Shared>, cancel: CancelToken) {
    let mut accumulated: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; shared.buffer_size];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            read = stream.read(&mut chunk) => match read {
                Ok(0) => return,
                Ok(n) => n,
                Err(_) => return,
            },
        };
        accumulated.extend_from_slice(&chunk[..n]);

        // Drain every complete value already in the buffer; trailing bytes
        // stay for the next round.
        loop {
            let (value, consumed) = {
                let mut values = serde_json::Deserializer::from_slice(&accumulated)
                    .into_iter::<Value>();
                match values.next() {
                    Some(Ok(value)) => (value, values.byte_offset()),
                    _ => break,
                }
            };
            accumulated.drain(..consumed);

            let response = dispatch(&shared, value).await;
            if stream.write_all(response.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Dispatch one decoded request, consulting the memo cache when enabled.
async fn dispatch(shared: &Shared, request: Value) -> String {
    let memo_key = shared.memo.as_ref().map(|_| request.to_string());

    if let (Some(memo), Some(key)) = (shared.memo.as_ref(), memo_key.as_ref()) {
        if let Some(hit) = memo.lock().await.get(key) {
            return hit.clone();
        }
    }

    let response = match &shared.pool {
        Some(pool) => pool
            .submit(request)
            .await
            .unwrap_or_else(|| "null".to_string()),
        None => match shared.handler.handle(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "handler error");
                "null".to_string()
            }
        },
    };

    if let (Some(memo), Some(key)) = (shared.memo.as_ref(), memo_key) {
        let mut memo = memo.lock().await;
        let within_cap = shared
            .memo_capacity
            .map(|cap| memo.len() < cap)
            .unwrap_or(true);
        if within_cap || memo.contains_key(&key) {
            memo.insert(key, response.clone());
        }
    }
    response
}
