// Response sanitization: strip incomplete tool-call fragments before
// persistence and attach reasoning to the final assistant message.
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub reasoning: Option<String>,
}

impl ResponseMessage {
    pub fn assistant(content: impl Into<String>, tool_calls: Option<Value>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            reasoning: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            reasoning: None,
        }
    }
}

/// Drops assistant tool calls that never produced a result, tool results
/// whose originating call was dropped, and assistant messages left with
/// neither content nor calls. Reasoning attaches to the last surviving
/// assistant message.
pub fn sanitize_response_messages(
    messages: Vec<ResponseMessage>,
    reasoning: &str,
) -> Vec<ResponseMessage> {
    let result_ids: HashSet<String> = messages
        .iter()
        .filter(|message| message.role == "tool")
        .filter_map(|message| message.tool_call_id.clone())
        .collect();

    let mut retained_call_ids: HashSet<String> = HashSet::new();
    let mut output = Vec::new();
    for mut message in messages {
        match message.role.as_str() {
            "assistant" => {
                message.tool_calls = message
                    .tool_calls
                    .take()
                    .map(|calls| filter_completed_calls(calls, &result_ids))
                    .filter(|calls| !calls_empty(calls));
                if let Some(calls) = &message.tool_calls {
                    for id in call_ids(calls) {
                        retained_call_ids.insert(id);
                    }
                }
                if message.content.trim().is_empty() && message.tool_calls.is_none() {
                    continue;
                }
                output.push(message);
            }
            "tool" => {
                let linked = message
                    .tool_call_id
                    .as_ref()
                    .map(|id| retained_call_ids.contains(id))
                    .unwrap_or(false);
                if linked {
                    output.push(message);
                }
            }
            _ => output.push(message),
        }
    }

    let reasoning = reasoning.trim();
    if !reasoning.is_empty() {
        if let Some(last) = output
            .iter_mut()
            .rev()
            .find(|message| message.role == "assistant")
        {
            last.reasoning = Some(reasoning.to_string());
        }
    }
    output
}

fn filter_completed_calls(calls: Value, result_ids: &HashSet<String>) -> Value {
    match calls {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|call| {
                    call.get("id")
                        .and_then(Value::as_str)
                        .map(|id| result_ids.contains(id))
                        .unwrap_or(false)
                })
                .collect(),
        ),
        other => other,
    }
}

fn calls_empty(calls: &Value) -> bool {
    match calls {
        Value::Array(items) => items.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn call_ids(calls: &Value) -> Vec<String> {
    match calls {
        Value::Array(items) => items
            .iter()
            .filter_map(|call| call.get("id").and_then(Value::as_str))
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
