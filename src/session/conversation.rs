//! Append-only conversation history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A line typed by the user.
    UserText { text: String },
    /// Text produced by the assistant.
    AssistantText { text: String },
    /// The assistant asked for a tool to be run.
    AssistantToolUse {
        tool_name: String,
        tool_call_id: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },
    /// The serialized result of a tool run, sent back as the user.
    UserToolResult {
        tool_call_id: String,
        result_text: String,
    },
}

impl Message {
    /// Whether the message is attributed to the user side of the exchange.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::UserText { .. } | Self::UserToolResult { .. })
    }
}

/// History of a single conversation, kept for the lifetime of the process.
///
/// Messages are only ever appended.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
        }
    }

    /// Identifier used to correlate log events.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_user_text(&mut self, text: impl Into<String>) {
        self.messages.push(Message::UserText { text: text.into() });
    }

    /// Append assistant text. Empty text is dropped; returns whether a
    /// message was added.
    pub fn add_assistant_text(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.is_empty() {
            return false;
        }
        self.messages.push(Message::AssistantText { text });
        true
    }

    pub fn add_tool_use(
        &mut self,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) {
        self.messages.push(Message::AssistantToolUse {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            arguments,
        });
    }

    pub fn add_tool_result(
        &mut self,
        tool_call_id: impl Into<String>,
        result_text: impl Into<String>,
    ) {
        self.messages.push(Message::UserToolResult {
            tool_call_id: tool_call_id.into(),
            result_text: result_text.into(),
        });
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_keep_append_order() {
        let mut conv = Conversation::new();
        conv.add_user_text("what time is it?");
        assert!(conv.add_assistant_text("Let me check."));
        conv.add_tool_use("now", "toolu_1", serde_json::Map::new());
        conv.add_tool_result("toolu_1", r#"{"time":"12:00"}"#);

        assert_eq!(conv.len(), 4);
        assert!(matches!(conv.messages()[0], Message::UserText { .. }));
        assert!(matches!(conv.messages()[1], Message::AssistantText { .. }));
        assert!(matches!(
            conv.messages()[2],
            Message::AssistantToolUse { ref tool_call_id, .. } if tool_call_id == "toolu_1"
        ));
        assert_eq!(
            conv.last(),
            Some(&Message::UserToolResult {
                tool_call_id: "toolu_1".into(),
                result_text: r#"{"time":"12:00"}"#.into(),
            })
        );
    }

    #[test]
    fn test_empty_assistant_text_is_dropped() {
        let mut conv = Conversation::new();
        assert!(!conv.add_assistant_text(""));
        assert!(conv.is_empty());
    }

    #[test]
    fn test_conversations_get_distinct_ids() {
        assert_ne!(Conversation::new().id(), Conversation::new().id());
    }

    #[test]
    fn test_message_serializes_with_type_tag() {
        let mut args = serde_json::Map::new();
        args.insert("message".into(), json!("hi"));
        let msg = Message::AssistantToolUse {
            tool_name: "echo".into(),
            tool_call_id: "toolu_9".into(),
            arguments: args,
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "assistant_tool_use");
        assert_eq!(value["arguments"]["message"], "hi");
        assert!(!msg.is_user());
        assert!(
            Message::UserToolResult {
                tool_call_id: "x".into(),
                result_text: String::new(),
            }
            .is_user()
        );
    }
}
