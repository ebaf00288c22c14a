//! Protocol client for a single MCP server.
//!
//! Wraps a [`Transport`] with newline-delimited JSON-RPC framing and the
//! connection lifecycle:
//!
//! ```text
//! Disconnected --connect--> Connected --initialize--> Initialized
//!        \                      |                          |
//!         `-------------------close-------------------> Closed
//! ```
//!
//! Exactly one request is in flight at a time. Each reply must carry the id
//! of the outstanding request; anything else is reported as
//! [`McpError::ResponseIdMismatch`]. Every wait is bounded by a timeout and
//! can be abandoned through the client's cancellation token.
//!
//! A failed exchange (timeout, cancellation, bad reply, broken pipe) leaves
//! the stream at an unknown position, so the client closes the connection
//! and later operations fail with [`McpError::InvalidState`].

use std::fmt;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::ServerDescriptor;
use super::error::McpError;
use super::transport::{Channel, StdioTransport, Transport, forward_diagnostics};
use super::types::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION,
    ServerInfo, Tool, methods,
};

/// Client name announced in `initialize`.
pub const CLIENT_NAME: &str = "mcp-host";

/// Default deadline for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the `initialize` handshake.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
    Initialized,
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Initialized => "initialized",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Deadlines applied to server round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub request: Duration,
    pub initialize: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST_TIMEOUT,
            initialize: DEFAULT_INIT_TIMEOUT,
        }
    }
}

/// Protocol client bound to exactly one server.
pub struct McpClient {
    server_name: String,
    transport: Box<dyn Transport>,
    channel: Option<Channel>,
    diagnostics: Option<JoinHandle<()>>,
    state: ClientState,
    timeouts: ClientTimeouts,
    cancel: CancellationToken,
    server_info: Option<ServerInfo>,
}

impl fmt::Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.server_name)
            .field("state", &self.state)
            .field("transport", &self.transport)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// A disconnected client over an arbitrary transport.
    pub fn new(server_name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
            channel: None,
            diagnostics: None,
            state: ClientState::Disconnected,
            timeouts: ClientTimeouts::default(),
            cancel: CancellationToken::new(),
            server_info: None,
        }
    }

    /// A disconnected client that will run `descriptor` as a child process.
    pub fn stdio(server_name: impl Into<String>, descriptor: ServerDescriptor) -> Self {
        Self::new(server_name, Box::new(StdioTransport::new(descriptor)))
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Abandon any pending wait when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ClientState::Initialized
    }

    /// Identity the server reported during `initialize`.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start the server process and open its pipes.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        self.ensure_state(ClientState::Disconnected, "connect")?;

        let mut channel = self.transport.connect(&self.server_name).await?;
        if let Some(stderr) = channel.diagnostics.take() {
            self.diagnostics = Some(forward_diagnostics(&self.server_name, stderr));
        }
        self.channel = Some(channel);
        self.state = ClientState::Connected;

        tracing::debug!(
            name: "mcp.server.connected",
            server = %self.server_name,
            "Server connected"
        );
        Ok(())
    }

    /// Perform the `initialize` handshake followed by the `initialized`
    /// notification.
    pub async fn initialize(&mut self) -> Result<(), McpError> {
        self.ensure_state(ClientState::Connected, "initialize")?;

        let request = JsonRpcRequest::new(
            methods::INITIALIZE,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {},
            }),
        );

        let result = self
            .round_trip(request, self.timeouts.initialize)
            .await?
            .into_result(&self.server_name)?;

        let info: InitializeResult = serde_json::from_value(result).unwrap_or_else(|e| {
            tracing::debug!(
                server = %self.server_name,
                error = %e,
                "Ignoring unparseable initialize payload"
            );
            InitializeResult::default()
        });

        self.notify(JsonRpcRequest::notification(methods::INITIALIZED, None))
            .await?;

        let server_info = info.server_info.unwrap_or_default();
        tracing::info!(
            name: "mcp.server.initialized",
            server = %self.server_name,
            protocol_version = info.protocol_version.as_deref().unwrap_or("unknown"),
            server_name = server_info.name.as_deref().unwrap_or("unknown"),
            server_version = server_info.version.as_deref().unwrap_or("unknown"),
            "Server initialized"
        );

        self.server_info = Some(server_info);
        self.state = ClientState::Initialized;
        Ok(())
    }

    /// Tear down the transport. Safe to call in any state, any number of times.
    pub async fn close(&mut self) -> Result<(), McpError> {
        if self.state == ClientState::Closed {
            return Ok(());
        }

        // Dropping the channel closes the server's stdin and our read ends.
        self.channel = None;
        if let Some(task) = self.diagnostics.take() {
            task.abort();
        }
        self.state = ClientState::Closed;

        let result = self.transport.close(&self.server_name).await;
        match &result {
            Ok(()) => tracing::debug!(
                name: "mcp.server.closed",
                server = %self.server_name,
                "Server closed"
            ),
            Err(e) => tracing::warn!(
                server = %self.server_name,
                error = %e,
                "Server teardown failed"
            ),
        }
        result
    }

    // ─── Tools ───────────────────────────────────────────────────────────

    /// Fetch the server's tool catalog, following `nextCursor` pages.
    pub async fn list_tools(&mut self) -> Result<Vec<Tool>, McpError> {
        self.ensure_state(ClientState::Initialized, "list tools on")?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self
                .round_trip(
                    JsonRpcRequest::new(methods::TOOLS_LIST, params),
                    self.timeouts.request,
                )
                .await?
                .into_result(&self.server_name)?;

            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::MalformedResponse {
                    server: self.server_name.clone(),
                    reason: format!("invalid tools/list result: {e}"),
                })?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(McpError::MalformedResponse {
                        server: self.server_name.clone(),
                        reason: format!("tools/list repeated cursor '{next}'"),
                    });
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(server = %self.server_name, tool_count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Invoke a tool and return the raw result payload.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        self.ensure_state(ClientState::Initialized, "call tools on")?;

        let request = JsonRpcRequest::new(
            methods::TOOLS_CALL,
            json!({ "name": name, "arguments": arguments }),
        );
        let result = self
            .round_trip(request, self.timeouts.request)
            .await?
            .into_result(&self.server_name)?;

        if result.get("isError").and_then(serde_json::Value::as_bool) == Some(true) {
            tracing::warn!(
                name: "mcp.tool.reported_error",
                server = %self.server_name,
                tool = %name,
                "Tool reported an error result"
            );
        }

        Ok(result)
    }

    // ─── Wire ────────────────────────────────────────────────────────────

    fn ensure_state(&self, expected: ClientState, operation: &'static str) -> Result<(), McpError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(McpError::InvalidState {
                server: self.server_name.clone(),
                operation,
                state: self.state,
            })
        }
    }

    /// Send one request and wait for its reply under a deadline.
    ///
    /// On failure the connection is closed before the error is returned.
    async fn round_trip(
        &mut self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let server = self.server_name.clone();
        let operation = request.method.clone();
        let cancel = self.cancel.clone();

        let outcome = {
            let channel = self.channel.as_mut().ok_or_else(|| McpError::Transport {
                server: server.clone(),
                reason: "not connected".into(),
            })?;

            tokio::select! {
                () = cancel.cancelled() => Err(McpError::Cancelled {
                    server: server.clone(),
                    operation: operation.clone(),
                }),
                res = tokio::time::timeout(timeout, exchange(&server, channel, &request)) => {
                    res.unwrap_or_else(|_| {
                        Err(McpError::Timeout {
                            server: server.clone(),
                            operation: operation.clone(),
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        })
                    })
                }
            }
        };

        if let Err(e) = &outcome {
            tracing::warn!(
                name: "mcp.server.desynced",
                server = %server,
                operation = %operation,
                error = %e,
                "Exchange failed; closing connection"
            );
            // Teardown failures are logged by `close`.
            let _ = self.close().await;
        }
        outcome
    }

    /// Write a notification. No reply is read.
    async fn notify(&mut self, notification: JsonRpcRequest) -> Result<(), McpError> {
        let server = self.server_name.clone();
        let channel = self.channel.as_mut().ok_or_else(|| McpError::Transport {
            server: server.clone(),
            reason: "not connected".into(),
        })?;
        write_message(&server, channel, &notification).await
    }
}

async fn write_message(
    server: &str,
    channel: &mut Channel,
    message: &JsonRpcRequest,
) -> Result<(), McpError> {
    let transport_err = |reason: String| McpError::Transport {
        server: server.to_string(),
        reason,
    };

    let line = message
        .to_line()
        .map_err(|e| transport_err(format!("failed to serialize {}: {e}", message.method)))?;
    channel
        .writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| transport_err(format!("failed to write to stdin: {e}")))?;
    channel
        .writer
        .flush()
        .await
        .map_err(|e| transport_err(format!("failed to flush stdin: {e}")))
}

/// Write `request`, then read lines until its reply arrives.
async fn exchange(
    server: &str,
    channel: &mut Channel,
    request: &JsonRpcRequest,
) -> Result<JsonRpcResponse, McpError> {
    write_message(server, channel, request).await?;

    let expected = request.id.clone().unwrap_or_default();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = channel
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| McpError::Transport {
                server: server.to_string(),
                reason: format!("failed to read from stdout: {e}"),
            })?;

        if bytes_read == 0 {
            return Err(McpError::Transport {
                server: server.to_string(),
                reason: "server stdout closed (process may have exited)".into(),
            });
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| McpError::MalformedResponse {
                server: server.to_string(),
                reason: format!("reply is not JSON: {e}"),
            })?;

        // Server-initiated notifications and requests are not replies.
        if let Some(method) = value.get("method").and_then(serde_json::Value::as_str) {
            tracing::debug!(
                server = %server,
                method = %method,
                "Skipping server-initiated message"
            );
            continue;
        }

        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| McpError::MalformedResponse {
                server: server.to_string(),
                reason: format!("reply is not a JSON-RPC response: {e}"),
            })?;

        return match response.id_text() {
            Some(actual) if actual == expected => Ok(response),
            actual => Err(McpError::ResponseIdMismatch {
                server: server.to_string(),
                expected,
                actual: actual.unwrap_or_else(|| "null".into()),
            }),
        };
    }
}
