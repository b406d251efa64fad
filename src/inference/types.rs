//! Wire types for the OpenAI-compatible chat completions API.

use serde::{Deserialize, Serialize};

use crate::agent_core::types::{Turn, TurnRole};

/// Prefix marking a tool result relayed to the model as a user message.
pub const TOOL_RESULT_PREFIX: &str = "Tool result: ";

// ─── Request Types ───────────────────────────────────────────────────────────

/// Message role as understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    /// Tool results travel as `user` messages: the tool-call protocol is
    /// carried in plain text, so the backend's native `tool` role (which
    /// requires a `tool_call_id`) does not apply.
    fn from(turn: &Turn) -> Self {
        match turn.role {
            TurnRole::System => ChatMessage {
                role: Role::System,
                content: turn.content.clone(),
            },
            TurnRole::User => ChatMessage {
                role: Role::User,
                content: turn.content.clone(),
            },
            TurnRole::Assistant => ChatMessage {
                role: Role::Assistant,
                content: turn.content.clone(),
            },
            TurnRole::ToolResult => ChatMessage {
                role: Role::User,
                content: format!("{TOOL_RESULT_PREFIX}{}", turn.content),
            },
        }
    }
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Non-streaming response body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
}

/// A single completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The assistant message within a choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning/thinking content from models like Qwen3. Deserialized so
    /// unknown-field handling stays lenient; not surfaced.
    #[serde(default)]
    #[allow(dead_code)]
    pub reasoning: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_turn_maps_to_user_message() {
        let msg = ChatMessage::from(&Turn::tool_result(r#"{"success":true,"data":1}"#));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, r#"Tool result: {"success":true,"data":1}"#);
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let msg = ChatMessage::from(&Turn::assistant("hi"));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_response_with_null_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null},"finish_reason":"stop"}]}"#;
        let resp: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert!(resp.choices[0].message.content.is_none());
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
