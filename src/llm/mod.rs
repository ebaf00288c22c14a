//! LLM collaborator interface.
//!
//! The orchestrator treats the model as a request/response service: it
//! hands over the tool catalog and the whole conversation, and gets back an
//! ordered list of [`ContentBlock`]s.
//!
//! # Drivers
//!
//! - [`AnthropicDriver`]: Anthropic Messages API (`/v1/messages`)
//! - [`ScriptedDriver`]: replays canned responses, for offline runs and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_host::llm::{AnthropicDriver, LlmSettings};
//!
//! let settings = LlmSettings::new("sk-ant-...");
//! let driver = AnthropicDriver::new(settings);
//! ```

pub mod anthropic;
pub mod orchestrator;
pub mod scripted;

pub use anthropic::AnthropicDriver;
pub use orchestrator::{HostOptions, Orchestrator, OrchestratorError, StartupError};
pub use scripted::ScriptedDriver;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mcp::types::Tool;
use crate::session::Conversation;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-latest";

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default completion budget per request.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default deadline for one completion.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the API (e.g., `https://api.anthropic.com`).
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens the model may generate per response.
    pub max_tokens: u32,
    /// Deadline for one completion request.
    pub timeout: Duration,
}

impl LlmSettings {
    /// Defaults for everything but the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}

// Keep the key out of logs.
impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One block of an LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text for the user.
    Text { text: String },
    /// A request to run a tool. `input` is whatever the model produced and
    /// is not guaranteed to be an object.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Failures talking to the model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The HTTP request could not be sent or its body not read.
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("failed to decode LLM response: {0}")]
    Decode(String),

    /// No response before the deadline.
    #[error("LLM request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// The model as seen by the orchestrator.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Produce the next assistant response for `history`, offering `tools`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the reply cannot be decoded.
    async fn complete(
        &self,
        tools: &[Tool],
        history: &Conversation,
    ) -> Result<Vec<ContentBlock>, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_debug_redacts_key() {
        let settings = LlmSettings::new("sk-ant-secret");
        let dbg = format!("{settings:?}");
        assert!(!dbg.contains("sk-ant-secret"));
        assert!(dbg.contains(DEFAULT_MODEL));
    }

    #[test]
    fn test_content_block_wire_shape() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_use",
            "id": "toolu_01",
            "name": "echo",
            "input": {"message": "hi"}
        }))
        .unwrap();
        assert_eq!(block, ContentBlock::tool_use("toolu_01", "echo", json!({"message": "hi"})));

        let text: ContentBlock =
            serde_json::from_value(json!({"type": "text", "text": "hello"})).unwrap();
        assert_eq!(text, ContentBlock::text("hello"));
    }
}
