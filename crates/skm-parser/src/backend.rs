// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backend parser and relevance-oracle seams.
//!
//! Production backends are framed-JSON TCP services; tests swap in local
//! fakes. The [`BackendList`] keeps its members in adaptive MRU order so the
//! backend that last succeeded is tried first.

use serde_json::{Value, json};
use tracing::debug;

use skm_wire::{ClientConfig, JsonTcpClient, WireError};

/// One backend parser service.
pub trait ParserBackend: Send {
    /// Stable backend name (used for ordering assertions and logs).
    fn name(&self) -> &str;

    /// Send one request value and read the backend's response.
    fn send(&mut self, request: &Value) -> Result<Value, WireError>;
}

/// The relevance oracle: scores whether a root module is worth keeping.
pub trait RelevanceOracle: Send {
    /// The `impact` score for `module`; `> 0` means relevant.
    fn impact(&mut self, module: &str) -> Result<i64, WireError>;
}

/// A backend parser reached over the framed-JSON TCP protocol.
pub struct TcpBackend {
    name: String,
    client: JsonTcpClient,
}

impl TcpBackend {
    /// Connect to a backend service.
    pub fn connect(name: impl Into<String>, config: &ClientConfig) -> Result<Self, WireError> {
        Ok(Self {
            name: name.into(),
            client: JsonTcpClient::connect(config)?,
        })
    }
}

impl ParserBackend for TcpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, request: &Value) -> Result<Value, WireError> {
        self.client.send(request)
    }
}

/// A relevance oracle reached over the framed-JSON TCP protocol.
pub struct TcpOracle {
    client: JsonTcpClient,
}

impl TcpOracle {
    /// Connect to an oracle service.
    pub fn connect(config: &ClientConfig) -> Result<Self, WireError> {
        Ok(Self {
            client: JsonTcpClient::connect(config)?,
        })
    }
}

impl RelevanceOracle for TcpOracle {
    fn impact(&mut self, module: &str) -> Result<i64, WireError> {
        let response = self.client.send(&json!({ "module": module }))?;
        Ok(response
            .get("impact")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

/// Outcome of a backend sweep that found no usable parser.
#[derive(Debug)]
pub struct BackendFailure {
    /// The last error or `error` payload observed.
    pub reason: String,
}

/// An ordered list of backend parsers with MRU promotion.
pub struct BackendList {
    backends: Vec<Box<dyn ParserBackend>>,
}

impl BackendList {
    /// A list tried in the given initial order.
    pub fn new(backends: Vec<Box<dyn ParserBackend>>) -> Self {
        Self { backends }
    }

    /// Current try-order of backend names.
    pub fn order(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Try each backend in order; a response without an `error` field wins
    /// and promotes its backend to the head of the list.
    pub fn parse(&mut self, request: &Value) -> Result<Value, BackendFailure> {
        let mut last_reason = String::from("no backends configured");
        for index in 0..self.backends.len() {
            match self.backends[index].send(request) {
                Ok(response) => {
                    if let Some(error) = response.get("error") {
                        debug!(
                            backend = self.backends[index].name(),
                            %error,
                            "backend refused the source"
                        );
                        last_reason = error.to_string();
                        continue;
                    }
                    let winner = self.backends.remove(index);
                    self.backends.insert(0, winner);
                    return Ok(response);
                }
                Err(err) => {
                    debug!(backend = self.backends[index].name(), error = %err, "backend unreachable");
                    last_reason = err.to_string();
                }
            }
        }
        Err(BackendFailure {
            reason: last_reason,
        })
    }
}
