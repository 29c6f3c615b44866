// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subprocess launching over an authenticated Unix-domain rendezvous.
//!
//! One launcher task owns the rendezvous listener for the whole server and
//! serializes launches: spawn the subprocess, accept exactly one connection,
//! and require the connecting process to present the server's auth key before
//! any work is forwarded.

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::ServerError;

/// How long a freshly spawned subprocess may take to connect back.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable carrying the rendezvous socket path to subprocesses.
pub const WORKER_SOCKET_ENV: &str = "SKM_WORKER_SOCKET";

/// Environment variable carrying the auth key to subprocesses.
pub const WORKER_AUTH_ENV: &str = "SKM_WORKER_AUTH";

// ---------------------------------------------------------------------------
// WorkerChannel
// ---------------------------------------------------------------------------

/// An established connection to one worker subprocess.
///
/// The wire format is JSONL: one JSON value per line for requests, one JSON
/// string per line for responses. The optional child handle is killed on
/// shutdown; fakes built from [`WorkerChannel::from_stream`] have none.
pub struct WorkerChannel {
    reader: BufReader<UnixStream>,
    child: Option<Child>,
}

impl WorkerChannel {
    /// A channel over an existing stream with no subprocess attached.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            child: None,
        }
    }

    pub(crate) fn with_child(reader: BufReader<UnixStream>, child: Child) -> Self {
        Self {
            reader,
            child: Some(child),
        }
    }

    /// Forward one request and read one response line.
    pub async fn exchange(&mut self, request: &Value) -> Result<String, ServerError> {
        let mut line = request.to_string();
        line.push('\n');
        self.reader
            .write_all(line.as_bytes())
            .await
            .map_err(ServerError::WorkerIo)?;
        self.reader.flush().await.map_err(ServerError::WorkerIo)?;

        let mut response = String::new();
        let n = self
            .reader
            .read_line(&mut response)
            .await
            .map_err(ServerError::WorkerIo)?;
        if n == 0 {
            return Err(ServerError::WorkerIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "worker closed the connection",
            )));
        }
        serde_json::from_str::<String>(response.trim_end()).map_err(|e| {
            ServerError::WorkerIo(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Kill the subprocess, if any, and drop the connection. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerLauncher
// ---------------------------------------------------------------------------

/// The seam through which workers obtain subprocess connections.
///
/// Production uses [`SubprocessLauncher`]; tests inject socketpair-backed
/// fakes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Obtain a fresh, authenticated worker connection.
    async fn launch(&self) -> Result<WorkerChannel, ServerError>;
}

struct LaunchRequest {
    respond: oneshot::Sender<Result<WorkerChannel, ServerError>>,
}

/// Spawns worker subprocesses over the server's Unix-domain rendezvous.
pub struct SubprocessLauncher {
    tx: mpsc::Sender<LaunchRequest>,
    socket_path: PathBuf,
}

impl SubprocessLauncher {
    /// Create the rendezvous socket and start the launcher task.
    ///
    /// The task owns the listener, handles one launch at a time, and removes
    /// the socket file on cancellation.
    pub fn start(command: Vec<String>, cancel: CancelToken) -> Result<Self, ServerError> {
        let socket_path =
            std::env::temp_dir().join(format!("skm.server.channel.{}", std::process::id()));
        let _ = std::fs::remove_file(&socket_path);
        let listener =
            UnixListener::bind(&socket_path).map_err(|source| ServerError::Rendezvous {
                path: socket_path.display().to_string(),
                source,
            })?;

        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let auth_key = hex::encode(key_bytes);

        // Launch requests are serialized through a capacity-1 channel.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(launcher_task(
            listener,
            socket_path.clone(),
            auth_key,
            command,
            rx,
            cancel,
        ));
        Ok(Self { tx, socket_path })
    }

    /// Path of the rendezvous socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl WorkerLauncher for SubprocessLauncher {
    async fn launch(&self) -> Result<WorkerChannel, ServerError> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(LaunchRequest { respond })
            .await
            .map_err(|_| ServerError::PoolClosed)?;
        response.await.map_err(|_| ServerError::PoolClosed)?
    }
}

async fn launcher_task(
    listener: UnixListener,
    socket_path: PathBuf,
    auth_key: String,
    command: Vec<String>,
    mut rx: mpsc::Receiver<LaunchRequest>,
    cancel: CancelToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let result = launch_one(&listener, &socket_path, &auth_key, &command).await;
        let _ = request.respond.send(result);
    }
    let _ = std::fs::remove_file(&socket_path);
    debug!(path = %socket_path.display(), "rendezvous removed");
}

async fn launch_one(
    listener: &UnixListener,
    socket_path: &Path,
    auth_key: &str,
    command: &[String],
) -> Result<WorkerChannel, ServerError> {
    let program = command.first().ok_or_else(|| {
        ServerError::Spawn(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty worker command",
        ))
    })?;

    let mut cmd = Command::new(program);
    cmd.args(&command[1..])
        .env(WORKER_SOCKET_ENV, socket_path)
        .env(WORKER_AUTH_ENV, auth_key)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ServerError::Spawn)?;

    // Forward subprocess stderr through tracing.
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end();
                if !line.is_empty() {
                    warn!(target: "skm_server.worker", "{line}");
                }
            }
        });
    }

    match accept_authenticated(listener, auth_key, ACCEPT_TIMEOUT).await {
        Ok(reader) => Ok(WorkerChannel::with_child(reader, child)),
        Err(err) => {
            let _ = child.kill().await;
            Err(err)
        }
    }
}

/// Accept one connection and require an `{"auth": "<key>"}` first line.
async fn accept_authenticated(
    listener: &UnixListener,
    auth_key: &str,
    deadline: Duration,
) -> Result<BufReader<UnixStream>, ServerError> {
    let (stream, _) = timeout(deadline, listener.accept())
        .await
        .map_err(|_| ServerError::AcceptTimeout(deadline))?
        .map_err(ServerError::WorkerIo)?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(deadline, reader.read_line(&mut line))
        .await
        .map_err(|_| ServerError::AcceptTimeout(deadline))?
        .map_err(ServerError::WorkerIo)?;

    let greeting: Value =
        serde_json::from_str(line.trim_end()).map_err(|_| ServerError::Unauthenticated)?;
    if greeting.get("auth").and_then(Value::as_str) == Some(auth_key) {
        Ok(reader)
    } else {
        Err(ServerError::Unauthenticated)
    }
}
