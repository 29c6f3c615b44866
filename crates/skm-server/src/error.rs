// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for server and worker-pool operations.

use thiserror::Error;

/// Errors from the callback server and its subprocess worker pool.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that could not be bound.
        address: String,
        /// Socket-level cause.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the Unix-domain rendezvous socket.
    #[error("failed to create rendezvous socket {path}: {source}")]
    Rendezvous {
        /// Socket path.
        path: String,
        /// Socket-level cause.
        #[source]
        source: std::io::Error,
    },

    /// Failed to spawn a worker subprocess.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// A spawned worker did not connect back in time.
    #[error("worker did not connect to the rendezvous within {0:?}")]
    AcceptTimeout(std::time::Duration),

    /// A connecting worker presented a bad or missing auth key.
    #[error("worker failed authentication")]
    Unauthenticated,

    /// I/O on an established worker connection failed.
    #[error("worker connection error: {0}")]
    WorkerIo(#[source] std::io::Error),

    /// The worker pool or launcher has shut down.
    #[error("worker pool is closed")]
    PoolClosed,
}
