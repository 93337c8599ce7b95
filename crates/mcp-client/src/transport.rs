//! Transport layer for tool servers.
//!
//! A tool server is a child process speaking JSON-RPC 2.0 over
//! newline-delimited stdin/stdout. [`StdioTransport`] owns the process;
//! the [`McpTransport`] trait is the seam that lets the registry and the
//! bridge session run against in-process fakes in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use mb_domain::config::ToolServerConfig;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Trait for tool server transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the underlying connection is still usable.
    fn is_alive(&self) -> bool;

    /// Shut the transport down. Must be idempotent.
    async fn shutdown(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Non-JSON stdout lines tolerated per read before the server is
/// declared broken (guards against servers that log to stdout).
const STDOUT_NOISE_LIMIT: usize = 1000;

/// How long a shutting-down server gets before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Both ends of the child's pipe, guarded by a single lock.
///
/// Locking the pair for the whole request/response cycle is what keeps
/// concurrent callers from reading each other's responses; the pipe
/// itself has no framing beyond newlines.
struct ChildIo {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// Stdio transport: one child process, JSON-RPC over stdin/stdout.
pub struct StdioTransport {
    io: Mutex<ChildIo>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    alive: AtomicBool,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the configured command with piped stdin/stdout.
    ///
    /// The child's stderr flows through to the terminal so server-side
    /// diagnostics stay visible without risking a full pipe.
    pub fn spawn(
        config: &ToolServerConfig,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut child = tokio::process::Command::new(&config.command)
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("stdout"))?;

        Ok(Self {
            io: Mutex::new(ChildIo {
                stdin,
                reader: BufReader::new(stdout),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            request_timeout,
        })
    }

    /// One full request/response cycle against the locked pipe pair.
    ///
    /// Skips blank lines, stdout noise, notifications, and responses to
    /// other requests until the response with `id` shows up. Marks the
    /// transport dead on EOF or when the noise limit is hit.
    async fn exchange(&self, io: &mut ChildIo, id: u64, frame: &str) -> Result<JsonRpcResponse, TransportError> {
        io.stdin.write_all(frame.as_bytes()).await?;
        io.stdin.write_all(b"\n").await?;
        io.stdin.flush().await?;

        let mut noise = 0usize;
        loop {
            let mut line = String::new();
            if io.reader.read_line(&mut line).await? == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }
            if !frame.starts_with('{') {
                noise += 1;
                if noise >= STDOUT_NOISE_LIMIT {
                    self.alive.store(false, Ordering::SeqCst);
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "tool server produced too many non-JSON lines on stdout",
                    )));
                }
                tracing::debug!(line = %frame, "skipping stdout noise from tool server");
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(frame) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        expected_id = id,
                        got_id = resp.id,
                        "response for a different request, continuing"
                    );
                }
                // Notifications and other unsolicited frames are skipped.
                Err(_) => {
                    tracing::debug!(line = %frame, "skipping non-response frame from tool server");
                }
            }
        }
    }
}

fn broken_pipe(which: &str) -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {which}"),
    ))
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, "sending tool server request");

        // Holding the io lock across the whole exchange serializes
        // request/response cycles between concurrent callers.
        let mut io = self.io.lock().await;
        match tokio::time::timeout(self.request_timeout, self.exchange(&mut io, id, &frame)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let frame = serde_json::to_string(&JsonRpcNotification::new(method))?;
        tracing::debug!(method, "sending tool server notification");

        let mut io = self.io.lock().await;
        io.stdin.write_all(frame.as_bytes()).await?;
        io.stdin.write_all(b"\n").await?;
        io.stdin.flush().await?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);

        // Closing stdin signals a well-behaved server to exit.
        {
            let mut io = self.io.lock().await;
            if let Err(e) = io.stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing tool server stdin");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "tool server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for tool server process");
            }
            Err(_) => {
                tracing::warn!("tool server did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill tool server process");
                }
            }
        }
    }
}
