// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tracing setup for skillmap processes.
//!
//! Scanner, callback servers, and their subprocess workers all initialise
//! logging the same way: an `EnvFilter` built from `LOG_LEVEL` (the variable
//! worker subprocesses inherit), falling back to `info`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use tracing_subscriber::EnvFilter;

/// Upper bound on one emitted message, matching the RFC-3164 syslog limit
/// the log transport enforces downstream.
pub const MAX_MESSAGE_LENGTH: usize = 1024;

/// Initialise tracing from the `LOG_LEVEL` environment variable.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_with_level(&level);
}

/// Initialise tracing at an explicit level or filter expression.
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Truncate a message to the syslog transport limit.
pub fn truncate_message(message: &str) -> &str {
    match message.char_indices().nth(MAX_MESSAGE_LENGTH) {
        Some((index, _)) => &message[..index],
        None => message,
    }
}
