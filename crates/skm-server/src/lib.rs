// SPDX-License-Identifier: MIT OR Apache-2.0
//! Memoizing JSON callback TCP server with an on-demand subprocess worker
//! pool.
//!
//! The server accepts connections and multiplexes them as cooperative tasks;
//! each connection accumulates bytes and attempts a JSON decode after every
//! read, dispatching exactly one value per exchange. Blocking handler work is
//! offloaded to subprocess workers that rendezvous over an authenticated
//! Unix-domain socket and are torn down after an idle timeout.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
mod launcher;
mod pool;
mod server;

pub use cancel::CancelToken;
pub use config::{HandlerRegistry, RequestHandler, ServerConfig, sync_handler};
pub use error::ServerError;
pub use launcher::{
    SubprocessLauncher, WORKER_AUTH_ENV, WORKER_SOCKET_ENV, WorkerChannel, WorkerLauncher,
};
pub use pool::WorkerPool;
pub use server::{CallbackServer, RunningServer};
