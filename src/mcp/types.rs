//! JSON-RPC 2.0 envelopes and MCP protocol structures.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::McpError;

/// JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Method names used by the host.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// Request (with `id`) or notification (without).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// A request with a freshly generated id.
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(params),
        }
    }

    /// A notification: no id, no reply expected.
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            id: None,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Reply to a request: exactly one of `result` / `error` is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

impl JsonRpcResponse {
    /// Successful reply.
    pub fn success(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: Some(serde_json::Value::String(id.into())),
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Error reply.
    pub fn failure(id: impl Into<String>, error: JsonRpcError) -> Self {
        Self {
            id: Some(serde_json::Value::String(id.into())),
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
        }
    }

    /// The reply id rendered as text (`None` when absent or null).
    pub fn id_text(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Unwrap the result, mapping an error object to [`McpError::Protocol`].
    pub fn into_result(self, server: &str) -> Result<serde_json::Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Protocol {
                server: server.to_string(),
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        self.result.ok_or_else(|| McpError::MalformedResponse {
            server: server.to_string(),
            reason: "response carries neither result nor error".into(),
        })
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC error codes the host emits or checks.
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A tool as advertised by a server in `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolInputSchema,
}

impl Tool {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// JSON Schema fragment describing a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolInputSchema {
    /// The schema as a JSON object, suitable for handing to an LLM.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.schema_type,
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// Payload of a `tools/list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// Payload of an `initialize` reply. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

/// Server identity reported during `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip_preserves_fields() {
        let req = JsonRpcRequest::new(
            methods::TOOLS_CALL,
            json!({"name": "echo", "arguments": {"message": "hi", "n": 3}}),
        );
        let line = req.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: JsonRpcRequest = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, req);
        assert_eq!(parsed.params.unwrap()["arguments"]["n"], 3);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = JsonRpcRequest::new(methods::TOOLS_LIST, json!({}));
        let b = JsonRpcRequest::new(methods::TOOLS_LIST, json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_notification_omits_id() {
        let note = JsonRpcRequest::notification(methods::INITIALIZED, None);
        let json = serde_json::to_string(&note).unwrap();
        assert!(note.is_notification());
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("params"));
        assert!(json.contains("notifications/initialized"));
    }

    #[test]
    fn test_response_round_trip_preserves_fields() {
        let resp = JsonRpcResponse::success("abc", json!({"tools": [], "extra": {"k": "v"}}));
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: JsonRpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
        assert_eq!(parsed.id_text().as_deref(), Some("abc"));
    }

    #[test]
    fn test_numeric_id_text() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
        assert_eq!(resp.id_text().as_deref(), Some("7"));
    }

    #[test]
    fn test_into_result_maps_error_object() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match resp.into_result("s").unwrap_err() {
            McpError::Protocol { code, message, .. } => {
                assert_eq!(code, error_codes::METHOD_NOT_FOUND);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    #[test]
    fn test_into_result_missing_both_is_malformed() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1"}"#).unwrap();
        assert!(resp.into_result("s").unwrap_err().is_malformed());
    }

    #[test]
    fn test_tool_optional_fields_default() {
        let tool: Tool =
            serde_json::from_value(json!({"name": "now", "inputSchema": {"type": "object"}}))
                .unwrap();
        assert_eq!(tool.description(), "");
        assert!(tool.input_schema.properties.is_empty());
        assert!(tool.input_schema.required.is_empty());
    }

    #[test]
    fn test_tool_wrong_types_rejected() {
        let bad = json!({"name": 5, "inputSchema": {"type": "object"}});
        assert!(serde_json::from_value::<Tool>(bad).is_err());

        let bad_required = json!({
            "name": "echo",
            "inputSchema": {"type": "object", "required": "message"}
        });
        assert!(serde_json::from_value::<Tool>(bad_required).is_err());
    }
}
