// Chat execution: one streaming completion with the tool set attached,
// bounded tool rounds, then sanitize and persist the assistant output.
use crate::config::Config;
use crate::schemas::ChatMessagePayload;
use crate::services::llm::{build_llm_client, ChatMessage};
use crate::services::tools::{self, ToolContext};
use crate::storage::{MessageRecord, StorageBackend};
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex as ParkingMutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

mod sanitize;
mod stream;

pub use sanitize::{sanitize_response_messages, ResponseMessage};
pub use stream::{EventEmitter, WordChunker};

pub const MAX_TOOL_ROUNDS: usize = 5;

const SYSTEM_PROMPT: &str = "You are a friendly assistant! Keep your responses concise and helpful.";

#[derive(Debug)]
pub struct OrchestratorError {
    code: &'static str,
    message: String,
}

impl OrchestratorError {
    fn new(code: &'static str, message: String) -> Self {
        Self { code, message }
    }

    fn model_not_configured() -> Self {
        Self::new(
            "MODEL_NOT_CONFIGURED",
            "no chat model is configured for this selector".to_string(),
        )
    }

    fn upstream(message: String) -> Self {
        Self::new("UPSTREAM_ERROR", message)
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OrchestratorError {}

#[derive(Debug, Clone)]
pub struct ChatExecution {
    pub user_id: String,
    pub chat_id: String,
    pub selected_model: Option<String>,
    pub messages: Vec<ChatMessagePayload>,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(config: Config, storage: Arc<dyn StorageBackend>, http: reqwest::Client) -> Self {
        Self {
            config,
            storage,
            http,
        }
    }

    /// Runs the chat and streams events into `emitter`. The returned answer
    /// is the final assistant text; persistence failures after streaming are
    /// logged and do not fail the call.
    pub async fn execute(
        &self,
        request: ChatExecution,
        emitter: EventEmitter,
    ) -> Result<String, OrchestratorError> {
        let (model_name, model_config) = self
            .config
            .llm
            .resolve_model(request.selected_model.as_deref())
            .ok_or_else(OrchestratorError::model_not_configured)?;
        let llm = build_llm_client(model_config, self.http.clone());
        if !llm.is_configured() {
            return Err(OrchestratorError::model_not_configured());
        }

        // Reasoning variants run without tools.
        let use_tools = !model_config.is_reasoning_variant(&model_name);
        let tool_defs = if use_tools {
            tools::tool_definitions()
        } else {
            Vec::new()
        };
        let tool_defs_ref = if tool_defs.is_empty() {
            None
        } else {
            Some(tool_defs.as_slice())
        };

        let mut working = vec![ChatMessage::text("system", SYSTEM_PROMPT)];
        for message in &request.messages {
            working.push(ChatMessage::text(&message.role, &message.content));
        }

        let mut collected: Vec<ResponseMessage> = Vec::new();
        let mut reasoning_all = String::new();
        let mut tool_rounds = 0usize;
        let chunker = Arc::new(ParkingMutex::new(WordChunker::default()));

        let answer = loop {
            let delta_emitter = emitter.clone();
            let delta_chunker = chunker.clone();
            let on_delta = move |content: String, reasoning: String| {
                let emitter = delta_emitter.clone();
                let chunker = delta_chunker.clone();
                async move {
                    if !reasoning.is_empty() {
                        emitter.emit("reasoning", json!({ "text": reasoning })).await;
                    }
                    if !content.is_empty() {
                        let words = chunker.lock().push(&content);
                        for word in words {
                            emitter.emit("delta", json!({ "text": word })).await;
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                }
            };
            let response = llm
                .stream_complete_with_tools(&working, tool_defs_ref, on_delta)
                .await
                .map_err(|err| OrchestratorError::upstream(err.to_string()))?;
            let rest = chunker.lock().flush();
            if let Some(rest) = rest {
                emitter.emit("delta", json!({ "text": rest })).await;
            }
            if !response.reasoning.is_empty() {
                reasoning_all.push_str(&response.reasoning);
            }

            let calls = response
                .tool_calls
                .as_ref()
                .map(|raw| normalize_tool_calls(raw))
                .unwrap_or_default();
            if calls.is_empty() || !use_tools || tool_rounds >= MAX_TOOL_ROUNDS {
                collected.push(ResponseMessage::assistant(response.content.clone(), None));
                break response.content;
            }
            tool_rounds += 1;

            let calls_payload = tool_calls_payload(&calls);
            collected.push(ResponseMessage::assistant(
                response.content.clone(),
                Some(calls_payload.clone()),
            ));
            working.push(ChatMessage {
                role: "assistant".to_string(),
                content: Value::String(response.content),
                tool_calls: Some(calls_payload),
                tool_call_id: None,
            });

            let tool_context = ToolContext {
                http: &self.http,
                llm: Some(&llm),
            };
            for call in &calls {
                emitter
                    .emit(
                        "tool_call",
                        json!({ "id": call.id, "name": call.name, "arguments": call.arguments }),
                    )
                    .await;
                let result = tools::execute_tool(&tool_context, &call.name, &call.arguments).await;
                emitter
                    .emit(
                        "tool_result",
                        json!({ "id": call.id, "name": call.name, "result": result }),
                    )
                    .await;
                let result_text = result.to_string();
                collected.push(ResponseMessage::tool(result_text.clone(), call.id.clone()));
                working.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Value::String(result_text),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }
        };

        let sanitized = sanitize_response_messages(collected, &reasoning_all);
        self.persist_response(&request.chat_id, &sanitized);
        emitter.emit("final", json!({ "answer": answer })).await;
        Ok(answer)
    }

    fn persist_response(&self, chat_id: &str, messages: &[ResponseMessage]) {
        let now = now_ts();
        let records = messages
            .iter()
            .map(|message| MessageRecord {
                message_id: format!("msg_{}", Uuid::new_v4().simple()),
                chat_id: chat_id.to_string(),
                role: message.role.clone(),
                content: message.content.clone(),
                tool_calls: message.tool_calls.as_ref().map(ToString::to_string),
                tool_call_id: message.tool_call_id.clone(),
                reasoning: message.reasoning.clone(),
                created_at: now,
            })
            .collect::<Vec<_>>();
        if let Err(err) = self.storage.save_messages(&records) {
            warn!("failed to save chat messages for {chat_id}: {err}");
        }
    }
}

#[derive(Debug, Clone)]
struct ToolCallPlan {
    id: String,
    name: String,
    arguments: Value,
}

fn normalize_tool_calls(raw: &Value) -> Vec<ToolCallPlan> {
    let items: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![raw],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| {
            let function = item.get("function").unwrap_or(item);
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())?
                .to_string();
            let arguments = match function.get("arguments") {
                Some(Value::String(text)) => {
                    serde_json::from_str::<Value>(text).unwrap_or_else(|_| json!({}))
                }
                Some(value) => value.clone(),
                None => json!({}),
            };
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            Some(ToolCallPlan {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

fn tool_calls_payload(calls: &[ToolCallPlan]) -> Value {
    Value::Array(
        calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect(),
    )
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    #[test]
    fn persisted_response_messages_carry_chat_id_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(SqliteStorage::new(
            dir.path().join("driftchat.db").to_string_lossy().to_string(),
        ));
        storage.ensure_initialized().unwrap();
        let orchestrator = Orchestrator::new(
            Config::default(),
            storage.clone(),
            reqwest::Client::new(),
        );

        let sanitized = sanitize_response_messages(
            vec![
                ResponseMessage::assistant("", Some(json!([{ "id": "call_1" }]))),
                ResponseMessage::tool("{\"result\":\"4\"}", "call_1"),
                ResponseMessage::assistant("2+2 is 4", None),
            ],
            "worked it out",
        );
        orchestrator.persist_response("c1", &sanitized);

        let messages = storage.list_messages("c1", 0).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "assistant");
        assert!(messages[0].tool_calls.is_some());
        assert_eq!(messages[1].role, "tool");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[2].content, "2+2 is 4");
        assert_eq!(messages[2].reasoning.as_deref(), Some("worked it out"));
        assert!(messages.iter().all(|message| message.chat_id == "c1"));
    }

    #[test]
    fn normalize_parses_string_arguments_and_keeps_ids() {
        let raw = json!([
            {
                "id": "call_1",
                "type": "function",
                "function": { "name": "calculator", "arguments": "{\"expression\": \"2+2\"}" }
            }
        ]);
        let calls = normalize_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].arguments["expression"], json!("2+2"));
    }

    #[test]
    fn normalize_generates_missing_ids_and_skips_nameless_calls() {
        let raw = json!([
            { "function": { "name": "get_date", "arguments": "{}" } },
            { "function": { "name": "", "arguments": "{}" } }
        ]);
        let calls = normalize_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].name, "get_date");
    }

    #[test]
    fn normalize_accepts_bare_function_call_objects() {
        let raw = json!({ "name": "get_date", "arguments": "{}" });
        let calls = normalize_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_date");
    }

    #[test]
    fn tool_calls_payload_serializes_arguments_as_text() {
        let calls = vec![ToolCallPlan {
            id: "call_1".to_string(),
            name: "calculator".to_string(),
            arguments: json!({ "expression": "2+2" }),
        }];
        let payload = tool_calls_payload(&calls);
        let call = &payload.as_array().unwrap()[0];
        assert_eq!(call["function"]["arguments"], json!("{\"expression\":\"2+2\"}"));
    }
}
