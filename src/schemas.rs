// API request and stream event payloads, field names match the client wire format.
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessagePayload>,
    #[serde(default, alias = "selectedChatModel")]
    pub selected_chat_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessagePayload {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessagePayload {
    pub fn is_user(&self) -> bool {
        self.role.trim() == "user"
    }
}

/// Last user-authored entry in the inbound history, if any.
pub fn most_recent_user_message(messages: &[ChatMessagePayload]) -> Option<&ChatMessagePayload> {
    messages.iter().rev().find(|message| message.is_user())
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub event: String,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "input_tokens")]
    pub input: u64,
    #[serde(rename = "output_tokens")]
    pub output: u64,
    #[serde(rename = "total_tokens")]
    pub total: u64,
}
