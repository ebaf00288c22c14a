//! In-process MCP server over in-memory pipes.
//!
//! [`InProcessTransport`] runs a request handler on a background task and
//! connects it to the client through a `tokio::io::duplex` pair, so the
//! client's framing, id checks and lifecycle run exactly as they would
//! against a child process. Every message the server receives is recorded
//! in a shared [`RequestLog`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use super::error::McpError;
use super::transport::{Channel, Transport};
use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Tool, methods};

const PIPE_CAPACITY: usize = 64 * 1024;

/// What the server writes back for one incoming message.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A success reply carrying the request's id.
    Result(Value),
    /// An error reply carrying the request's id.
    Error(JsonRpcError),
    /// Arbitrary text written verbatim, followed by a newline.
    Raw(String),
    /// Write nothing.
    Silent,
}

type Handler = Arc<dyn Fn(&JsonRpcRequest) -> Reply + Send + Sync>;

/// Messages received by an in-process server, shared with the test or
/// embedder that created it.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    requests: Arc<Mutex<Vec<JsonRpcRequest>>>,
    closes: Arc<AtomicUsize>,
}

impl RequestLog {
    fn record(&self, request: JsonRpcRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }

    /// Every message received so far, in arrival order.
    pub fn requests(&self) -> Vec<JsonRpcRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }

    /// `tools/call` requests as `(tool name, arguments)`.
    pub fn tool_calls(&self) -> Vec<(String, Value)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == methods::TOOLS_CALL)
            .filter_map(|r| {
                let params = r.params?;
                let name = params.get("name")?.as_str()?.to_string();
                Some((name, params.get("arguments").cloned().unwrap_or(Value::Null)))
            })
            .collect()
    }

    /// How many times the transport has been closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Transport whose server is a closure running in this process.
pub struct InProcessTransport {
    handler: Handler,
    log: RequestLog,
    task: Option<JoinHandle<()>>,
    fail_close: bool,
}

impl std::fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("running", &self.task.is_some())
            .field("fail_close", &self.fail_close)
            .finish_non_exhaustive()
    }
}

impl InProcessTransport {
    /// A server that answers each message with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&JsonRpcRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            log: RequestLog::default(),
            task: None,
            fail_close: false,
        }
    }

    /// A well-behaved tool server: answers `initialize`, lists `tools` and
    /// dispatches `tools/call` to `call`.
    pub fn tool_server<F>(tools: Vec<Tool>, call: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
    {
        Self::new(move |req| match req.method.as_str() {
            methods::INITIALIZE => Reply::Result(json!({
                "protocolVersion": super::types::PROTOCOL_VERSION,
                "serverInfo": {"name": "in-process", "version": "0.0.0"},
                "capabilities": {"tools": {}},
            })),
            methods::TOOLS_LIST => Reply::Result(json!({ "tools": tools })),
            methods::TOOLS_CALL => {
                let params = req.params.clone().unwrap_or(Value::Null);
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = params.get("arguments").cloned().unwrap_or(json!({}));
                match call(name, &args) {
                    Ok(result) => Reply::Result(result),
                    Err(e) => Reply::Error(e),
                }
            }
            _ if req.is_notification() => Reply::Silent,
            other => Reply::Error(JsonRpcError {
                code: super::types::error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
                data: None,
            }),
        })
    }

    /// Report a teardown failure from [`Transport::close`].
    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Handle on the messages this server receives.
    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn connect(&mut self, _server: &str) -> Result<Channel, McpError> {
        let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, mut server_write) = tokio::io::split(server_io);

        let handler = Arc::clone(&self.handler);
        let log = self.log.clone();

        self.task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<JsonRpcRequest>(&line) else {
                    continue;
                };
                log.record(request.clone());

                let id = request.id.clone().unwrap_or_default();
                let out = match handler(&request) {
                    Reply::Result(result) => {
                        serde_json::to_string(&JsonRpcResponse::success(id, result)).ok()
                    }
                    Reply::Error(error) => {
                        serde_json::to_string(&JsonRpcResponse::failure(id, error)).ok()
                    }
                    Reply::Raw(text) => Some(text),
                    Reply::Silent => None,
                };

                if let Some(mut out) = out {
                    out.push('\n');
                    if server_write.write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = server_write.flush().await;
                }
            }
        }));

        Ok(Channel::new(Box::new(client_write), Box::new(client_read), None))
    }

    async fn close(&mut self, server: &str) -> Result<(), McpError> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.fail_close {
            return Err(McpError::Teardown {
                server: server.to_string(),
                reason: "simulated teardown failure".into(),
            });
        }
        Ok(())
    }
}
