//! Child-process transport.
//!
//! A [`Transport`] starts one server and hands back its pipes as a
//! [`Channel`]. [`StdioTransport`] is the production implementation; the
//! trait exists so the protocol client can be driven over in-memory pipes.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead};

use super::config::ServerDescriptor;
use super::error::McpError;

/// How long to wait for a killed child to be reaped.
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest stderr line forwarded to the log in one event. Longer output is
/// split at this size.
const MAX_DIAGNOSTIC_LINE: usize = 8 * 1024;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// The three byte streams of a connected server.
pub struct Channel {
    /// Server's standard input.
    pub writer: BoxedWriter,
    /// Server's standard output.
    pub reader: BufReader<BoxedReader>,
    /// Server's standard error, if captured.
    pub diagnostics: Option<BoxedReader>,
}

impl Channel {
    pub fn new(writer: BoxedWriter, reader: BoxedReader, diagnostics: Option<BoxedReader>) -> Self {
        Self {
            writer,
            reader: BufReader::new(reader),
            diagnostics,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("diagnostics", &self.diagnostics.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts a server and tears it down again.
#[async_trait]
pub trait Transport: Send + std::fmt::Debug {
    /// Start the server and return its pipes.
    async fn connect(&mut self, server: &str) -> Result<Channel, McpError>;

    /// Terminate the server. Must be safe to call more than once.
    async fn close(&mut self, server: &str) -> Result<(), McpError>;
}

// ─── StdioTransport ──────────────────────────────────────────────────────────

/// Runs a server as a child process and talks to it over its stdio.
#[derive(Debug)]
pub struct StdioTransport {
    descriptor: ServerDescriptor,
    child: Option<Child>,
}

impl StdioTransport {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            child: None,
        }
    }

    /// OS process id of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self, server: &str) -> Result<Channel, McpError> {
        let mut cmd = Command::new(&self.descriptor.command);
        cmd.args(&self.descriptor.args)
            .envs(self.descriptor.resolved_env())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            server: server.to_string(),
            reason: format!("{}: {e}", self.descriptor.command),
        })?;

        let missing = |pipe: &str| McpError::Spawn {
            server: server.to_string(),
            reason: format!("failed to capture {pipe}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take();

        tracing::debug!(
            name: "mcp.transport.spawned",
            server = %server,
            command = %self.descriptor.command,
            pid = ?child.id(),
            "Server process spawned"
        );

        self.child = Some(child);

        Ok(Channel::new(
            Box::new(stdin),
            Box::new(stdout),
            stderr.map(|s| Box::new(s) as BoxedReader),
        ))
    }

    async fn close(&mut self, server: &str) -> Result<(), McpError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(server = %server, %status, "Server process had already exited");
            return Ok(());
        }

        match tokio::time::timeout(KILL_TIMEOUT, child.kill()).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    name: "mcp.transport.killed",
                    server = %server,
                    "Server process terminated"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(McpError::Teardown {
                server: server.to_string(),
                reason: format!("kill failed: {e}"),
            }),
            Err(_) => Err(McpError::Teardown {
                server: server.to_string(),
                reason: format!(
                    "process did not exit within {}s of kill",
                    KILL_TIMEOUT.as_secs()
                ),
            }),
        }
    }
}

/// Forward a server's stderr to the log, one line per event.
///
/// Keeps the pipe drained until the server closes it, whatever the server
/// writes: overlong lines are split and invalid UTF-8 is replaced.
pub fn forward_diagnostics(server: &str, stderr: BoxedReader) -> JoinHandle<()> {
    let server = server.to_string();
    tokio::spawn(async move {
        let mut chunks = FramedRead::new(stderr, BytesCodec::new());
        let mut pending = Vec::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    for line in split_lines(&mut pending, MAX_DIAGNOSTIC_LINE) {
                        log_diagnostic(&server, &line);
                    }
                }
                Err(e) => {
                    tracing::debug!(server = %server, error = %e, "Stopped reading server stderr");
                    break;
                }
            }
        }
        log_diagnostic(&server, &String::from_utf8_lossy(&pending));
    })
}

/// Take every complete line out of `pending`, plus `max`-sized pieces of an
/// unterminated line that has grown past `max`.
fn split_lines(pending: &mut Vec<u8>, max: usize) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let end = match pending.iter().position(|b| *b == b'\n') {
            Some(pos) if pos <= max => pos + 1,
            _ if pending.len() > max => max,
            _ => break,
        };
        let line: Vec<u8> = pending.drain(..end).collect();
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

fn log_diagnostic(server: &str, line: &str) {
    let line = line.trim_end();
    if !line.is_empty() {
        tracing::debug!(name: "mcp.server.stderr", server = %server, line = %line);
    }
}
