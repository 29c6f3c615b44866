// SPDX-License-Identifier: MIT OR Apache-2.0
//! On-demand subprocess worker pool.
//!
//! Each worker task owns at most one live subprocess. A worker with nothing
//! to do holds no subprocess at all; the first request spawns one through the
//! launcher, and going idle for longer than the configured timeout tears it
//! down again. Free workers advertise themselves on a ready queue, so a slow
//! request never blocks dispatch to the others.

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::launcher::{WorkerChannel, WorkerLauncher};

struct PoolRequest {
    request: Value,
    respond: oneshot::Sender<String>,
}

/// Handle to a running worker pool.
///
/// Submitting returns the worker's response string, or `None` when the
/// request was dropped (shutdown, launch failure surfaced as handler error).
pub struct WorkerPool {
    ready: Mutex<mpsc::Receiver<mpsc::Sender<PoolRequest>>>,
    live: Arc<AtomicUsize>,
    cancel: CancelToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` worker tasks against the given launcher.
    pub fn start(
        workers: usize,
        idle_timeout: Duration,
        launcher: Arc<dyn WorkerLauncher>,
        cancel: CancelToken,
    ) -> Self {
        let workers = workers.max(1);
        let live = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready_rx) = mpsc::channel(workers);
        let handles = (0..workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    ready_tx.clone(),
                    Arc::clone(&launcher),
                    idle_timeout,
                    cancel.clone(),
                    Arc::clone(&live),
                ))
            })
            .collect();
        Self {
            ready: Mutex::new(ready_rx),
            live,
            cancel,
            workers: handles,
        }
    }

    /// Hand one request to the next free worker and await its response.
    pub async fn submit(&self, request: Value) -> Option<String> {
        let slot = { self.ready.lock().await.recv().await? };
        let (respond, response) = oneshot::channel();
        slot.send(PoolRequest { request, respond }).await.ok()?;
        response.await.ok()
    }

    /// Number of live worker subprocesses right now.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Cancel all workers and wait for them to tear their subprocesses down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    index: usize,
    ready_tx: mpsc::Sender<mpsc::Sender<PoolRequest>>,
    launcher: Arc<dyn WorkerLauncher>,
    idle_timeout: Duration,
    cancel: CancelToken,
    live: Arc<AtomicUsize>,
) {
    let (slot_tx, mut slot_rx) = mpsc::channel::<PoolRequest>(1);
    let mut subprocess: Option<WorkerChannel> = None;

    'outer: loop {
        if ready_tx.send(slot_tx.clone()).await.is_err() {
            break;
        }

        // Wait for the next request; with a subprocess in hand, going idle
        // past the timeout tears it down and the wait continues bare.
        let request = loop {
            if subprocess.is_some() {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    received = timeout(idle_timeout, slot_rx.recv()) => match received {
                        Ok(Some(request)) => break request,
                        Ok(None) => break 'outer,
                        Err(_) => {
                            debug!(worker = index, "idle timeout, stopping subprocess");
                            teardown(&mut subprocess, &live).await;
                        }
                    },
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    received = slot_rx.recv() => match received {
                        Some(request) => break request,
                        None => break 'outer,
                    },
                }
            }
        };

        if subprocess.is_none() {
            match launcher.launch().await {
                Ok(channel) => {
                    live.fetch_add(1, Ordering::SeqCst);
                    subprocess = Some(channel);
                }
                Err(err) => {
                    warn!(worker = index, error = %err, "worker launch failed");
                    let _ = request.respond.send("null".to_string());
                    continue;
                }
            }
        }

        let channel = match subprocess.as_mut() {
            Some(channel) => channel,
            None => continue,
        };
        match channel.exchange(&request.request).await {
            Ok(response) => {
                let _ = request.respond.send(response);
            }
            Err(err) => {
                warn!(worker = index, error = %err, "worker exchange failed");
                teardown(&mut subprocess, &live).await;
                let _ = request.respond.send("null".to_string());
            }
        }
    }

    teardown(&mut subprocess, &live).await;
    debug!(worker = index, "worker stopped");
}

async fn teardown(subprocess: &mut Option<WorkerChannel>, live: &AtomicUsize) {
    if let Some(mut channel) = subprocess.take() {
        channel.shutdown().await;
        live.fetch_sub(1, Ordering::SeqCst);
    }
}
