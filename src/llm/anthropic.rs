//! Anthropic Messages API driver.
//!
//! Implements [`LlmDriver`] over `POST {base_url}/v1/messages`. The
//! conversation is converted to the API's alternating user/assistant form:
//! consecutive messages from the same side are merged into one message with
//! several content blocks.

use serde_json::{Value, json};

use crate::mcp::types::Tool;
use crate::session::{Conversation, Message};

use super::{ContentBlock, LlmDriver, LlmError, LlmSettings};

/// Value of the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

/// Driver for the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for AnthropicDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl AnthropicDriver {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, pools).
    #[must_use]
    pub fn with_client(settings: LlmSettings, http: reqwest::Client) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    async fn send(&self, body: &Value) -> Result<Vec<ContentBlock>, LlmError> {
        let url = format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'));

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = resp.json().await?;
        parse_response(&payload)
    }
}

#[async_trait::async_trait]
impl LlmDriver for AnthropicDriver {
    async fn complete(
        &self,
        tools: &[Tool],
        history: &Conversation,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        let body = build_request_body(&self.settings, tools, history);
        let timeout = self.settings.timeout;

        tracing::debug!(
            name: "llm.request.started",
            model = %self.settings.model,
            message_count = history.len(),
            tool_count = tools.len(),
            "Querying LLM"
        );

        let blocks = tokio::time::timeout(timeout, self.send(&body))
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        tracing::debug!(name: "llm.request.completed", block_count = blocks.len(), "LLM responded");
        Ok(blocks)
    }
}

/// JSON body for a Messages API request.
pub fn build_request_body(settings: &LlmSettings, tools: &[Tool], history: &Conversation) -> Value {
    let mut body = json!({
        "model": settings.model,
        "max_tokens": settings.max_tokens,
        "messages": to_api_messages(history),
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(to_api_tool).collect());
    }
    body
}

fn to_api_tool(tool: &Tool) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description(),
        "input_schema": tool.input_schema.to_value(),
    })
}

/// Convert the history, merging consecutive same-role messages.
pub fn to_api_messages(history: &Conversation) -> Vec<Value> {
    let mut out: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in history.messages() {
        let role = if message.is_user() { "user" } else { "assistant" };
        let block = match message {
            Message::UserText { text } | Message::AssistantText { text } => {
                json!({"type": "text", "text": text})
            }
            Message::AssistantToolUse {
                tool_name,
                tool_call_id,
                arguments,
            } => json!({
                "type": "tool_use",
                "id": tool_call_id,
                "name": tool_name,
                "input": arguments,
            }),
            Message::UserToolResult {
                tool_call_id,
                result_text,
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": result_text,
            }),
        };

        match out.last_mut() {
            Some((last_role, blocks)) if *last_role == role => blocks.push(block),
            _ => out.push((role, vec![block])),
        }
    }

    out.into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect()
}

/// Extract content blocks from a Messages API response.
///
/// Block types other than `text` and `tool_use` are ignored.
pub fn parse_response(payload: &Value) -> Result<Vec<ContentBlock>, LlmError> {
    let content = payload
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::Decode("response has no `content` array".into()))?;

    let mut blocks = Vec::with_capacity(content.len());
    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") | Some("tool_use") => {
                let parsed: ContentBlock = serde_json::from_value(block.clone())
                    .map_err(|e| LlmError::Decode(format!("invalid content block: {e}")))?;
                blocks.push(parsed);
            }
            other => {
                tracing::debug!(block_type = ?other, "Ignoring unsupported content block");
            }
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::ToolInputSchema;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn echo_tool() -> Tool {
        Tool {
            name: "echo".into(),
            description: None,
            input_schema: ToolInputSchema {
                schema_type: "object".into(),
                properties: json!({"message": {"type": "string"}}).as_object().cloned().unwrap(),
                required: vec!["message".into()],
            },
        }
    }

    #[test]
    fn test_consecutive_same_role_messages_are_merged() {
        let mut conv = Conversation::new();
        conv.add_user_text("echo hi");
        conv.add_assistant_text("Calling echo.");
        let mut args = serde_json::Map::new();
        args.insert("message".into(), json!("hi"));
        conv.add_tool_use("echo", "toolu_1", args);
        conv.add_tool_result("toolu_1", r#"{"content":"hi"}"#);
        conv.add_assistant_text("It said hi.");

        let messages = to_api_messages(&conv);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["id"], "toolu_1");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(messages[3]["content"][0]["text"], "It said hi.");
    }

    #[test]
    fn test_request_body_carries_tools_and_limits() {
        let mut settings = LlmSettings::new("k");
        settings.max_tokens = 77;
        let mut conv = Conversation::new();
        conv.add_user_text("hi");

        let body = build_request_body(&settings, &[echo_tool()], &conv);
        assert_eq!(body["max_tokens"], 77);
        assert_eq!(body["tools"][0]["name"], "echo");
        assert_eq!(body["tools"][0]["description"], "");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "message");

        let no_tools = build_request_body(&settings, &[], &conv);
        assert!(no_tools.get("tools").is_none());
    }

    #[test]
    fn test_parse_response_keeps_order_and_skips_unknown_blocks() {
        let payload = json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_2", "name": "now", "input": {}}
            ],
            "stop_reason": "tool_use"
        });
        let blocks = parse_response(&payload).unwrap();
        assert_eq!(
            blocks,
            vec![
                ContentBlock::text("Let me check."),
                ContentBlock::tool_use("toolu_2", "now", json!({})),
            ]
        );
    }

    #[test]
    fn test_parse_response_without_content_is_decode_error() {
        let err = parse_response(&json!({"type": "error"})).unwrap_err();
        assert!(matches!(err, LlmError::Decode(_)));
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn test_complete_sends_headers_and_parses_blocks() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"content":[{"type":"text","text":"hello"}]}"#).await;
        let mut settings = LlmSettings::new("sk-test");
        settings.base_url = base_url;
        let driver = AnthropicDriver::with_client(settings, local_client());

        let mut conv = Conversation::new();
        conv.add_user_text("hi");
        let blocks = driver.complete(&[], &conv).await.unwrap();
        assert_eq!(blocks, vec![ContentBlock::text("hello")]);

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /v1/messages"));
        assert!(request.contains("x-api-key: sk-test"));
        assert!(request.contains(&format!("anthropic-version: {API_VERSION}")));
    }

    #[tokio::test]
    async fn test_complete_maps_error_status() {
        let (base_url, _server) = serve_once(
            "401 Unauthorized",
            r#"{"type":"error","error":{"type":"authentication_error"}}"#,
        )
        .await;
        let mut settings = LlmSettings::new("bad");
        settings.base_url = base_url;
        let driver = AnthropicDriver::with_client(settings, local_client());

        let err = driver.complete(&[], &Conversation::new()).await.unwrap_err();
        match err {
            LlmError::Api { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("authentication_error"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
