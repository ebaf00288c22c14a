//! Conversation orchestrator.
//!
//! The orchestrator owns every MCP client, the tool registry and the
//! conversation. Per line of user input it:
//! 1. Appends the line to the conversation
//! 2. Queries the LLM with the tool catalog and full history
//! 3. Walks the response blocks in order, collecting text and dispatching
//!    tool-use requests to the owning server
//! 4. After each successful tool call, records the call and its result and
//!    asks the LLM for a follow-up
//! 5. Prints the collected text
//!
//! Tool dispatch failures (unknown tool, bad arguments, call error) are
//! logged and the block is skipped. LLM failures end the run.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mcp_host::llm::{AnthropicDriver, HostOptions, LlmSettings, Orchestrator};
//! use mcp_host::mcp::load_mcp_config;
//!
//! let config = load_mcp_config("mcp.json")?;
//! let driver = Arc::new(AnthropicDriver::new(LlmSettings::new(api_key)));
//! let mut host = Orchestrator::start(&config, driver, HostOptions::default(), cancel).await?;
//!
//! let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//! host.run(stdin, tokio::io::stdout()).await?;
//! host.shutdown().await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::mcp::client::{ClientTimeouts, McpClient};
use crate::mcp::config::McpConfig;
use crate::mcp::error::McpError;
use crate::mcp::registry::{CollisionPolicy, ToolRegistry};
use crate::session::Conversation;

use super::{ContentBlock, LlmDriver, LlmError};

/// Written before each read of user input.
pub const PROMPT_MARKER: &str = "prompt: ";

/// Default nesting depth for tool follow-ups.
pub const DEFAULT_FOLLOW_UP_DEPTH: usize = 1;

/// Host behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOptions {
    /// How many levels of follow-up responses are scanned for further tool
    /// use. `0` disables follow-up queries entirely.
    pub follow_up_depth: usize,
    pub collision_policy: CollisionPolicy,
    pub client_timeouts: ClientTimeouts,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            follow_up_depth: DEFAULT_FOLLOW_UP_DEPTH,
            collision_policy: CollisionPolicy::default(),
            client_timeouts: ClientTimeouts::default(),
        }
    }
}

/// The host could not be brought up. Every client started so far has been
/// closed again.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load server configuration: {0}")]
    Config(#[source] McpError),

    #[error("failed to start server '{server}': {source}")]
    Server {
        server: String,
        #[source]
        source: McpError,
    },

    #[error("failed to build tool registry: {0}")]
    Registry(#[source] McpError),
}

/// The run loop stopped.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to read user input: {0}")]
    Input(#[source] std::io::Error),

    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),

    #[error("LLM query failed: {0}")]
    Query(#[from] LlmError),

    #[error("cancelled")]
    Cancelled,
}

/// Text gathered while processing one turn.
#[derive(Debug, Default)]
struct TurnState {
    // Assistant text not yet recorded in the conversation.
    pending: Vec<String>,
    // Everything shown to the user this turn.
    output: Vec<String>,
}

impl TurnState {
    fn push_text(&mut self, text: &str) {
        self.pending.push(text.to_string());
        self.output.push(text.to_string());
    }
}

/// Drives the prompt / LLM / tool loop for a single conversation.
pub struct Orchestrator {
    clients: BTreeMap<String, McpClient>,
    registry: ToolRegistry,
    driver: Arc<dyn LlmDriver>,
    conversation: Conversation,
    options: HostOptions,
    cancel: CancellationToken,
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("servers", &self.clients.keys().collect::<Vec<_>>())
            .field("tool_count", &self.registry.len())
            .field("options", &self.options)
            .field("conversation_len", &self.conversation.len())
            .finish()
    }
}

impl Orchestrator {
    /// Load `path` and start every server it lists.
    pub async fn load(
        path: &str,
        driver: Arc<dyn LlmDriver>,
        options: HostOptions,
        cancel: CancellationToken,
    ) -> Result<Self, StartupError> {
        let config = crate::mcp::config::load_mcp_config(path).map_err(StartupError::Config)?;
        Self::start(&config, driver, options, cancel).await
    }

    /// Spawn one stdio client per configured server and bring them all up.
    pub async fn start(
        config: &McpConfig,
        driver: Arc<dyn LlmDriver>,
        options: HostOptions,
        cancel: CancellationToken,
    ) -> Result<Self, StartupError> {
        let clients = config
            .mcp_servers
            .iter()
            .map(|(name, descriptor)| {
                let client = McpClient::stdio(name.clone(), descriptor.clone())
                    .with_timeouts(options.client_timeouts)
                    .with_cancellation(cancel.child_token());
                (name.clone(), client)
            })
            .collect();

        Self::with_clients(clients, driver, options, cancel).await
    }

    /// Connect and initialize `clients` in name order, then build the
    /// registry. Any failure closes every client and aborts startup.
    pub async fn with_clients(
        mut clients: BTreeMap<String, McpClient>,
        driver: Arc<dyn LlmDriver>,
        options: HostOptions,
        cancel: CancellationToken,
    ) -> Result<Self, StartupError> {
        let mut failure = None;
        for (name, client) in &mut clients {
            let started = match client.connect().await {
                Ok(()) => client.initialize().await,
                Err(e) => Err(e),
            };
            if let Err(e) = started {
                failure = Some((name.clone(), e));
                break;
            }
        }

        if let Some((server, source)) = failure {
            tracing::error!(
                name: "mcp.host.startup_failed",
                server = %server,
                error = %source,
                "Server failed to start"
            );
            close_all(&mut clients).await;
            return Err(StartupError::Server { server, source });
        }

        let registry = match ToolRegistry::build(&mut clients, options.collision_policy).await {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!(
                    name: "mcp.host.startup_failed",
                    error = %e,
                    "Tool discovery failed"
                );
                close_all(&mut clients).await;
                return Err(StartupError::Registry(e));
            }
        };

        tracing::info!(
            name: "mcp.host.ready",
            server_count = clients.len(),
            tool_count = registry.len(),
            "Host ready"
        );

        Ok(Self {
            clients,
            registry,
            driver,
            conversation: Conversation::new(),
            options,
            cancel,
        })
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[must_use]
    pub fn client(&self, server: &str) -> Option<&McpClient> {
        self.clients.get(server)
    }

    /// Token that stops the run loop when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ─── Run loop ────────────────────────────────────────────────────────

    /// Read prompts from `input` until it is exhausted or the token is
    /// cancelled, writing each reply to `output`.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<(), OrchestratorError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            write_out(&mut output, PROMPT_MARKER).await?;

            let line = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(
                        name: "mcp.host.cancelled",
                        "Shutdown requested; leaving run loop"
                    );
                    return Ok(());
                }
                line = lines.next_line() => line.map_err(OrchestratorError::Input)?,
            };

            let Some(line) = line else {
                tracing::info!(name: "mcp.host.input_closed", "End of input");
                return Ok(());
            };

            match self.handle_turn(&line).await {
                Ok(Some(reply)) => write_out(&mut output, &format!("{reply}\n")).await?,
                Ok(None) => {}
                Err(OrchestratorError::Cancelled) => {
                    tracing::info!(name: "mcp.host.cancelled", "Shutdown requested during turn");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Process one user line. Returns the text to show, or `None` when the
    /// LLM produced no content.
    pub async fn handle_turn(&mut self, line: &str) -> Result<Option<String>, OrchestratorError> {
        self.conversation.add_user_text(line);

        let blocks = self.query().await?;
        if blocks.is_empty() {
            tracing::warn!(
                name: "llm.response.empty",
                conversation = %self.conversation.id(),
                "LLM returned no content"
            );
            return Ok(None);
        }

        let mut turn = TurnState::default();
        self.process_blocks(blocks, 0, &mut turn).await?;
        self.commit_pending(&mut turn);

        Ok(Some(turn.output.join("\n")))
    }

    /// Walk one response. `level` is 0 for the reply to the user's line and
    /// grows by one per follow-up.
    async fn process_blocks(
        &mut self,
        blocks: Vec<ContentBlock>,
        level: usize,
        turn: &mut TurnState,
    ) -> Result<(), OrchestratorError> {
        for block in blocks {
            match block {
                ContentBlock::Text { text } => turn.push_text(&text),
                ContentBlock::ToolUse { id, name, input } => {
                    if !self.dispatch_tool(&id, &name, input, turn).await? {
                        continue;
                    }
                    if self.options.follow_up_depth == 0 {
                        continue;
                    }

                    let follow_up = self.query().await?;
                    let next_level = level + 1;
                    if next_level < self.options.follow_up_depth {
                        Box::pin(self.process_blocks(follow_up, next_level, turn)).await?;
                    } else if let Some(text) = first_text(&follow_up) {
                        turn.push_text(text);
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one tool-use block. Returns whether the call succeeded and was
    /// recorded.
    async fn dispatch_tool(
        &mut self,
        call_id: &str,
        name: &str,
        input: serde_json::Value,
        turn: &mut TurnState,
    ) -> Result<bool, OrchestratorError> {
        let Some(route) = self.registry.resolve(name).cloned() else {
            tracing::warn!(
                name: "mcp.tool.unknown",
                tool = %name,
                "LLM requested a tool no server provides; skipping"
            );
            return Ok(false);
        };

        let arguments = match input {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                tracing::warn!(
                    name: "mcp.tool.bad_arguments",
                    tool = %name,
                    arguments = %other,
                    "Tool arguments are not a JSON object; skipping"
                );
                return Ok(false);
            }
        };

        let Some(client) = self.clients.get_mut(&route.server) else {
            tracing::warn!(
                tool = %name,
                server = %route.server,
                "Owning server is not connected; skipping"
            );
            return Ok(false);
        };

        tracing::info!(
            name: "mcp.tool.call",
            tool = %name,
            server = %route.server,
            call_id = %call_id,
            "Calling tool"
        );
        let result = match client.call_tool(&route.tool_name, arguments.clone()).await {
            Ok(result) => result,
            Err(McpError::Cancelled { .. }) => return Err(OrchestratorError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    name: "mcp.tool.failed",
                    tool = %name,
                    server = %route.server,
                    error = %e,
                    "Tool call failed; skipping"
                );
                return Ok(false);
            }
        };

        let result_text = match serde_json::to_string(&result) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    tool = %name,
                    error = %e,
                    "Failed to serialize tool result; skipping"
                );
                return Ok(false);
            }
        };

        self.commit_pending(turn);
        self.conversation.add_tool_use(name, call_id, arguments);
        self.conversation.add_tool_result(call_id, result_text);
        Ok(true)
    }

    fn commit_pending(&mut self, turn: &mut TurnState) {
        let text = turn.pending.join("\n");
        turn.pending.clear();
        self.conversation.add_assistant_text(text);
    }

    async fn query(&self) -> Result<Vec<ContentBlock>, OrchestratorError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(OrchestratorError::Cancelled),
            blocks = self.driver.complete(self.registry.tools(), &self.conversation) => {
                blocks.map_err(OrchestratorError::Query)
            }
        }
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Close every client, continuing past failures. Returns the failures.
    pub async fn shutdown(&mut self) -> Vec<McpError> {
        let failures = close_all(&mut self.clients).await;
        tracing::info!(
            name: "mcp.host.shutdown",
            server_count = self.clients.len(),
            failed = failures.len(),
            "Host shut down"
        );
        failures
    }
}

async fn close_all(clients: &mut BTreeMap<String, McpClient>) -> Vec<McpError> {
    let mut failures = Vec::new();
    for client in clients.values_mut() {
        if let Err(e) = client.close().await {
            failures.push(e);
        }
    }
    failures
}

fn first_text(blocks: &[ContentBlock]) -> Option<&str> {
    blocks.iter().find_map(|b| match b {
        ContentBlock::Text { text } => Some(text.as_str()),
        ContentBlock::ToolUse { .. } => None,
    })
}

async fn write_out<W: AsyncWrite + Unpin>(
    output: &mut W,
    text: &str,
) -> Result<(), OrchestratorError> {
    output
        .write_all(text.as_bytes())
        .await
        .map_err(OrchestratorError::Output)?;
    output.flush().await.map_err(OrchestratorError::Output)
}
