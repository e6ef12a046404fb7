//! Messages, tool calls and model responses
//!
//! These are the values that flow between the runner, the completion service
//! and the tools. A [`Message`] is never mutated once it has been appended to a
//! run's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::usage::Usage;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(Role::Assistant, content)
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Tool invocation requests carried by an assistant message.
    pub fn requested_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is the raw JSON payload exactly as the model produced it; it is
/// only parsed by whoever consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the raw arguments, treating an empty payload as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&self.arguments)?)
    }
}

/// Response from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: String,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ModelResponse {
    pub fn new_message(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: Some(content.into()),
            tool_calls: vec![],
            finish_reason: Some("stop".to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn new_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: None,
            tool_calls,
            finish_reason: Some("tool_calls".to_string()),
            created_at: Utc::now(),
        }
    }

    /// Text plus tool calls in the same response.
    pub fn new_mixed(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new_tool_calls(tool_calls)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// The assistant message this response becomes in the history.
    pub fn to_message(&self) -> Message {
        if self.has_tool_calls() {
            Message::assistant_with_tool_calls(self.text(), self.tool_calls.clone())
        } else {
            Message::assistant(self.text())
        }
    }
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text appended by this chunk.
    #[serde(default)]
    pub delta: String,
    /// Tool calls completed by this chunk.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Set on the terminating chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Usage of the whole completion, when the service reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        let msg = Message::tool("42", "call_1");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.requested_calls().is_empty());

        let call = ToolCall::new("call_1", "foo", "{}");
        let msg = Message::assistant_with_tool_calls("", vec![call.clone()]);
        assert_eq!(msg.requested_calls(), &[call]);
    }

    #[test]
    fn test_role_serialization() {
        let msg = Message::system("be brief");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn test_parsed_arguments() {
        let call = ToolCall::new("1", "foo", r#"{"city":"Paris"}"#);
        assert_eq!(call.parsed_arguments().unwrap(), json!({"city": "Paris"}));

        let empty = ToolCall::new("2", "foo", "  ");
        assert_eq!(empty.parsed_arguments().unwrap(), json!({}));

        let broken = ToolCall::new("3", "foo", "{oops");
        assert!(broken.parsed_arguments().is_err());
    }

    #[test]
    fn test_response_to_message() {
        let response = ModelResponse::new_mixed(
            "checking",
            vec![ToolCall::new("1", "lookup", "{}")],
        );
        let msg = response.to_message();
        assert_eq!(msg.content, "checking");
        assert_eq!(msg.requested_calls().len(), 1);

        let plain = ModelResponse::new_message("done").to_message();
        assert!(plain.tool_calls.is_none());
    }
}
