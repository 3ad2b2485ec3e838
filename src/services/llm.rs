// LLM adapter: OpenAI-compatible Chat Completions, blocking and streaming.
use crate::config::LlmModelConfig;
use crate::schemas::TokenUsage;
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Upper bound on a single upstream request, mirrors the endpoint's
/// maximum response duration.
pub const DEFAULT_REQUEST_TIMEOUT_S: u64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub reasoning: String,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Option<Value>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmModelConfig,
}

impl LlmClient {
    pub fn new(http: Client, config: LlmModelConfig) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config
            .model
            .as_ref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    }

    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse> {
        self.complete_with_tools(messages, None).await
    }

    pub async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<LlmResponse> {
        let response = self
            .http
            .post(self.endpoint())
            .timeout(self.timeout())
            .headers(self.headers())
            .json(&self.build_payload(messages, false, false, tools))
            .send()
            .await?;
        let status = response.status();
        let body_text = response.text().await.context("read llm response body")?;
        let body = match serde_json::from_str::<Value>(&body_text) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "LLM response json parse failed: {err}, body={}",
                    truncate_text(&body_text, 2048)
                );
                Value::Null
            }
        };
        if !status.is_success() {
            let detail = if body == Value::Null {
                json!({ "raw": truncate_text(&body_text, 2048) })
            } else {
                body
            };
            return Err(anyhow!("LLM request failed: {status} {detail}"));
        }
        if body == Value::Null {
            return Err(anyhow!(
                "LLM response parse failed: {}",
                truncate_text(&body_text, 2048)
            ));
        }
        let message = body
            .get("choices")
            .and_then(|value| value.get(0))
            .and_then(|value| value.get("message"))
            .cloned()
            .unwrap_or(Value::Null);
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let reasoning = message
            .get("reasoning_content")
            .or_else(|| message.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let tool_calls = extract_tool_calls(&message);
        let usage = normalize_usage(body.get("usage"));
        Ok(LlmResponse {
            content,
            reasoning,
            usage,
            tool_calls,
        })
    }

    /// Streaming completion. `on_delta` receives (content, reasoning) delta
    /// pairs as they arrive; tool-call fragments are merged internally and
    /// returned on the final response.
    pub async fn stream_complete_with_tools<F, Fut>(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        mut on_delta: F,
    ) -> Result<LlmResponse>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let include_usage = self.config.stream_include_usage.unwrap_or(true);
        let response = self
            .http
            .post(self.endpoint())
            .timeout(self.timeout())
            .headers(self.headers())
            .json(&self.build_payload(messages, true, include_usage, tools))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "LLM stream request failed: {status} {}",
                truncate_text(&text, 2048)
            ));
        }
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut combined = String::new();
        let mut reasoning_combined = String::new();
        let mut usage: Option<TokenUsage> = None;
        let mut tool_calls_accumulator: Vec<StreamToolCall> = Vec::new();
        let mut saw_done = false;
        while let Some(item) = stream.next().await {
            let bytes = item?;
            let part = String::from_utf8_lossy(&bytes);
            buffer.push_str(&part);
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer = buffer[pos + 1..].to_string();
                if line.is_empty() || !line.starts_with("data:") {
                    continue;
                }
                let data = line.trim_start_matches("data:").trim();
                if data == "[DONE]" {
                    saw_done = true;
                    break;
                }
                match serde_json::from_str::<Value>(data) {
                    Ok(payload) => {
                        if let Some(new_usage) = normalize_usage(payload.get("usage")) {
                            usage = Some(new_usage);
                        }
                        let delta = payload
                            .get("choices")
                            .and_then(|value| value.get(0))
                            .and_then(|value| value.get("delta"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        let content_delta =
                            delta.get("content").and_then(Value::as_str).unwrap_or("");
                        let reasoning_delta = delta
                            .get("reasoning_content")
                            .or_else(|| delta.get("reasoning"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        update_stream_tool_calls(&mut tool_calls_accumulator, &delta);
                        if !content_delta.is_empty() {
                            combined.push_str(content_delta);
                        }
                        if !reasoning_delta.is_empty() {
                            reasoning_combined.push_str(reasoning_delta);
                        }
                        if !content_delta.is_empty() || !reasoning_delta.is_empty() {
                            on_delta(content_delta.to_string(), reasoning_delta.to_string())
                                .await?;
                        }
                    }
                    Err(err) => {
                        warn!(
                            "LLM stream json parse failed: {err}, data={}",
                            truncate_text(data, 512)
                        );
                    }
                }
            }
            if saw_done {
                break;
            }
        }
        if !saw_done {
            warn!("LLM stream ended without [DONE]");
        }
        Ok(LlmResponse {
            content: combined,
            reasoning: reasoning_combined,
            usage,
            tool_calls: finalize_stream_tool_calls(&tool_calls_accumulator),
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_s.unwrap_or(DEFAULT_REQUEST_TIMEOUT_S).max(5))
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &self.config.api_key {
            if !api_key.trim().is_empty() {
                let value = format!("Bearer {}", api_key.trim());
                if let Ok(header_value) = value.parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, header_value);
                }
            }
        }
        headers
    }

    fn build_payload(
        &self,
        messages: &[ChatMessage],
        stream: bool,
        include_usage: bool,
        tools: Option<&[Value]>,
    ) -> Value {
        let mut payload = json!({
            "model": self.config.model.clone().unwrap_or_default(),
            "messages": messages,
            "temperature": self.config.temperature.unwrap_or(0.7),
            "stream": stream,
        });
        if stream && include_usage {
            payload["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(max_output) = self.config.max_output {
            if max_output > 0 {
                payload["max_tokens"] = json!(max_output);
            }
        }
        if let Some(stop) = &self.config.stop {
            if !stop.is_empty() {
                payload["stop"] = json!(stop);
            }
        }
        if let Some(tool_defs) = tools {
            if !tool_defs.is_empty() {
                payload["tools"] = Value::Array(tool_defs.to_vec());
                payload["tool_choice"] = json!("auto");
            }
        }
        payload
    }
}

pub fn build_llm_client(config: &LlmModelConfig, http: Client) -> LlmClient {
    LlmClient::new(http, config.clone())
}

fn normalize_usage(raw: Option<&Value>) -> Option<TokenUsage> {
    let raw = raw?;
    let Value::Object(map) = raw else {
        return None;
    };
    let to_u64 = |value: Option<&Value>| -> Option<u64> {
        match value {
            Some(Value::Number(num)) => num.as_u64(),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        }
    };
    let input = to_u64(map.get("input_tokens"))
        .or_else(|| to_u64(map.get("prompt_tokens")))
        .unwrap_or(0);
    let output = to_u64(map.get("output_tokens"))
        .or_else(|| to_u64(map.get("completion_tokens")))
        .unwrap_or(0);
    let total = to_u64(map.get("total_tokens")).unwrap_or(input + output);
    if input == 0 && output == 0 && total == 0 {
        return None;
    }
    Some(TokenUsage {
        input,
        output,
        total,
    })
}

fn extract_tool_calls(message: &Value) -> Option<Value> {
    let Value::Object(map) = message else {
        return None;
    };
    map.get("tool_calls")
        .or_else(|| map.get("tool_call"))
        .or_else(|| map.get("function_call"))
        .cloned()
}

#[derive(Debug, Default, Clone)]
struct StreamToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

fn update_stream_tool_calls(acc: &mut Vec<StreamToolCall>, delta: &Value) {
    let tool_calls_raw = delta.get("tool_calls").or_else(|| delta.get("tool_call"));
    let tool_calls = match tool_calls_raw {
        Some(Value::Array(items)) => Some(items.as_slice()),
        Some(Value::Object(_)) => tool_calls_raw.map(std::slice::from_ref),
        _ => None,
    };
    if let Some(items) = tool_calls {
        for item in items {
            if let Value::Object(map) = item {
                let index = map.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                while acc.len() <= index {
                    acc.push(StreamToolCall::default());
                }
                let slot = &mut acc[index];
                if let Some(id) = map.get("id").and_then(Value::as_str) {
                    slot.id = Some(id.to_string());
                }
                if let Some(function) = map.get("function") {
                    apply_function_delta(slot, function);
                }
            }
        }
    }

    if let Some(function_call) = delta.get("function_call") {
        if acc.is_empty() {
            acc.push(StreamToolCall::default());
        }
        apply_function_delta(&mut acc[0], function_call);
    }
}

fn apply_function_delta(slot: &mut StreamToolCall, function: &Value) {
    if let Value::Object(map) = function {
        if let Some(name) = map.get("name").and_then(Value::as_str) {
            slot.name.push_str(name);
        }
        if let Some(arguments) = map.get("arguments").and_then(Value::as_str) {
            slot.arguments.push_str(arguments);
        }
    }
}

fn finalize_stream_tool_calls(acc: &[StreamToolCall]) -> Option<Value> {
    let mut output = Vec::new();
    for call in acc {
        if call.name.trim().is_empty() {
            continue;
        }
        let mut payload = json!({
            "type": "function",
            "function": {
                "name": call.name,
                "arguments": call.arguments,
            }
        });
        if let Some(id) = &call.id {
            if let Value::Object(ref mut map) = payload {
                map.insert("id".to_string(), Value::String(id.clone()));
            }
        }
        output.push(payload);
    }
    if output.is_empty() {
        None
    } else {
        Some(Value::Array(output))
    }
}

fn truncate_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut output = text[..end].to_string();
    output.push_str("...");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmModelConfig;

    fn client_with(config: LlmModelConfig) -> LlmClient {
        LlmClient::new(Client::new(), config)
    }

    #[test]
    fn endpoint_appends_chat_completions_once() {
        let client = client_with(LlmModelConfig {
            base_url: Some("https://api.example.com/v1".to_string()),
            ..Default::default()
        });
        assert_eq!(
            client.endpoint(),
            "https://api.example.com/v1/chat/completions"
        );

        let client = client_with(LlmModelConfig {
            base_url: Some("https://api.example.com/".to_string()),
            ..Default::default()
        });
        assert_eq!(
            client.endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn payload_includes_tools_and_stream_options() {
        let client = client_with(LlmModelConfig {
            model: Some("gpt-4o-mini".to_string()),
            max_output: Some(512),
            ..Default::default()
        });
        let messages = vec![ChatMessage::text("user", "hello")];
        let tools = vec![json!({"type": "function", "function": {"name": "calculator"}})];
        let payload = client.build_payload(&messages, true, true, Some(&tools));
        assert_eq!(payload["model"], json!("gpt-4o-mini"));
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["stream_options"]["include_usage"], json!(true));
        assert_eq!(payload["max_tokens"], json!(512));
        assert_eq!(payload["tool_choice"], json!("auto"));
        assert_eq!(payload["tools"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn stream_tool_call_fragments_merge_by_index() {
        let mut acc = Vec::new();
        update_stream_tool_calls(
            &mut acc,
            &json!({
                "tool_calls": [
                    {"index": 0, "id": "call_1", "function": {"name": "calc", "arguments": "{\"expr"}}
                ]
            }),
        );
        update_stream_tool_calls(
            &mut acc,
            &json!({
                "tool_calls": [
                    {"index": 0, "function": {"name": "ulator", "arguments": "ession\": \"2+2\"}"}}
                ]
            }),
        );
        let merged = finalize_stream_tool_calls(&acc).expect("merged tool calls");
        let call = &merged.as_array().unwrap()[0];
        assert_eq!(call["id"], json!("call_1"));
        assert_eq!(call["function"]["name"], json!("calculator"));
        assert_eq!(
            call["function"]["arguments"],
            json!("{\"expression\": \"2+2\"}")
        );
    }

    #[test]
    fn incomplete_tool_calls_are_dropped() {
        let acc = vec![StreamToolCall {
            id: None,
            name: String::new(),
            arguments: "{}".to_string(),
        }];
        assert!(finalize_stream_tool_calls(&acc).is_none());
    }

    #[test]
    fn usage_normalizes_both_key_families() {
        let usage = normalize_usage(Some(&json!({
            "prompt_tokens": 10,
            "completion_tokens": 4,
        })))
        .expect("usage");
        assert_eq!(usage.input, 10);
        assert_eq!(usage.output, 4);
        assert_eq!(usage.total, 14);

        assert!(normalize_usage(Some(&json!({}))).is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate_text(text, 3);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 6);
    }
}
