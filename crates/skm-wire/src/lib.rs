// SPDX-License-Identifier: MIT OR Apache-2.0
//! Blocking framed-JSON TCP client.
//!
//! The wire protocol has no explicit framing: each direction carries exactly
//! one UTF-8 JSON value per exchange, and the reader accumulates bytes and
//! attempts a decode after every chunk until one succeeds. The client is
//! deliberately synchronous — it runs inside subprocess workers and language
//! parsers, which are single-threaded by design.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Default read deadline for a single exchange.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default receive chunk size.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Errors from a framed-JSON exchange.
#[derive(Debug, Error)]
pub enum WireError {
    /// The read deadline elapsed before a complete JSON value arrived.
    #[error("read from {peer} timed out after {timeout:?}")]
    Timeout {
        /// `host:port` of the remote service.
        peer: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The underlying socket failed.
    #[error("connection to {peer} failed: {source}")]
    Connection {
        /// `host:port` of the remote service.
        peer: String,
        /// Socket-level cause.
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the stream or sent something that can never decode.
    #[error("protocol violation from {peer}: {reason}")]
    Protocol {
        /// `host:port` of the remote service.
        peer: String,
        /// What went wrong.
        reason: String,
    },
}

/// Connection settings for a [`JsonTcpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Deadline for reading one response value.
    pub read_timeout: Duration,
    /// Receive chunk size.
    pub buffer_size: usize,
}

impl ClientConfig {
    /// Settings for `host:port` with default timeout and buffer size.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout: DEFAULT_READ_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the read deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Blocking request/response client for framed-JSON TCP services.
pub struct JsonTcpClient {
    stream: TcpStream,
    peer: String,
    read_timeout: Duration,
    buffer_size: usize,
}

impl std::fmt::Debug for JsonTcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonTcpClient")
            .field("peer", &self.peer)
            .finish()
    }
}

impl JsonTcpClient {
    /// Connect to the configured peer.
    pub fn connect(config: &ClientConfig) -> Result<Self, WireError> {
        let peer = format!("{}:{}", config.host, config.port);
        let stream =
            TcpStream::connect((config.host.as_str(), config.port)).map_err(|source| {
                WireError::Connection {
                    peer: peer.clone(),
                    source,
                }
            })?;
        stream
            .set_read_timeout(Some(config.read_timeout))
            .map_err(|source| WireError::Connection {
                peer: peer.clone(),
                source,
            })?;
        Ok(Self {
            stream,
            peer,
            read_timeout: config.read_timeout,
            buffer_size: config.buffer_size.max(1),
        })
    }

    /// `host:port` of the remote service.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one JSON value and read back exactly one JSON value.
    ///
    /// The response is accumulated chunk by chunk; a decode is attempted after
    /// every read and the first success wins. Fails with
    /// [`WireError::Timeout`] when the deadline elapses,
    /// [`WireError::Connection`] on socket loss, and [`WireError::Protocol`]
    /// on EOF before a decodable value.
    pub fn send(&mut self, request: &Value) -> Result<Value, WireError> {
        let payload = serde_json::to_vec(request).map_err(|e| WireError::Protocol {
            peer: self.peer.clone(),
            reason: format!("unencodable request: {e}"),
        })?;
        self.stream
            .write_all(&payload)
            .and_then(|()| self.stream.flush())
            .map_err(|source| WireError::Connection {
                peer: self.peer.clone(),
                source,
            })?;
        trace!(peer = %self.peer, bytes = payload.len(), "request written");

        let mut accumulated = Vec::new();
        let mut chunk = vec![0u8; self.buffer_size];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(WireError::Protocol {
                        peer: self.peer.clone(),
                        reason: "connection closed before a complete JSON value".into(),
                    });
                }
                Ok(n) => {
                    accumulated.extend_from_slice(&chunk[..n]);
                    if let Ok(value) = serde_json::from_slice::<Value>(&accumulated) {
                        trace!(peer = %self.peer, bytes = accumulated.len(), "response decoded");
                        return Ok(value);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(WireError::Timeout {
                        peer: self.peer.clone(),
                        timeout: self.read_timeout,
                    });
                }
                Err(source) => {
                    return Err(WireError::Connection {
                        peer: self.peer.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Shut the connection down. Errors are ignored; the peer may already be
    /// gone.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
