// Builtin tool definitions and the execution entry point. Tool failures are
// converted to fixed placeholder results and never propagate.
use crate::schemas::ToolSpec;
use crate::services::llm::{ChatMessage, LlmClient};
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

pub const TOOL_CALCULATOR: &str = "calculator";
pub const TOOL_GET_DATE: &str = "get_date";
pub const TOOL_WEB_SEARCH: &str = "web_search";
pub const TOOL_GET_WEATHER: &str = "get_weather";

const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

const CALCULATOR_SYSTEM_PROMPT: &str = "You are a calculator. You will be given an expression \
and you will need to calculate the result. Return the result as a plain text string, with any \
steps taken to think through it.";

const WEB_SEARCH_SYSTEM_PROMPT: &str = "You are a search engine for AI news. You will be given \
a query and you will need to search the web for the most relevant AI news for the last 24 hours \
based on the query. Return the result as a plain text string. Keep it short and concise and \
provide at least one source url for the news.";

pub struct ToolContext<'a> {
    pub http: &'a reqwest::Client,
    pub llm: Option<&'a LlmClient>,
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TOOL_CALCULATOR.to_string(),
            description: "Perform mathematical calculations".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "expression": { "type": "string" }
                },
                "required": ["expression"]
            }),
        },
        ToolSpec {
            name: TOOL_GET_DATE.to_string(),
            description: "Get the current date and time".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolSpec {
            name: TOOL_WEB_SEARCH.to_string(),
            description: "Search the web for AI companies".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "original_query": { "type": "string" },
                    "search_query": { "type": "string" },
                    "date": { "type": "string" },
                    "number_of_results": { "type": "integer" }
                },
                "required": ["search_query"]
            }),
        },
        ToolSpec {
            name: TOOL_GET_WEATHER.to_string(),
            description: "Get the current weather at a location".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" }
                },
                "required": ["latitude", "longitude"]
            }),
        },
    ]
}

/// Tool table in the wire format attached to a chat completion request.
pub fn tool_definitions() -> Vec<Value> {
    tool_specs()
        .into_iter()
        .map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.input_schema,
                }
            })
        })
        .collect()
}

pub async fn execute_tool(context: &ToolContext<'_>, name: &str, args: &Value) -> Value {
    let result = match name {
        TOOL_CALCULATOR => run_calculator(context, args).await,
        TOOL_GET_DATE => run_get_date(),
        TOOL_WEB_SEARCH => run_web_search(context, args).await,
        TOOL_GET_WEATHER => run_get_weather(context, args).await,
        other => Err(anyhow!("unknown tool: {other}")),
    };
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("tool {name} failed: {err}");
            placeholder_error(name)
        }
    }
}

/// Fixed per-tool failure payload surfaced inline in the tool output.
pub fn placeholder_error(name: &str) -> Value {
    let message = match name {
        TOOL_CALCULATOR => "Error performing calculation",
        TOOL_GET_DATE => "Error performing date",
        TOOL_WEB_SEARCH => "Error performing web search",
        TOOL_GET_WEATHER => "Error fetching weather",
        _ => "Error executing tool",
    };
    json!({ "result": message })
}

async fn run_calculator(context: &ToolContext<'_>, args: &Value) -> Result<Value> {
    let expression = args
        .get("expression")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("calculator requires an expression"))?;
    let llm = context
        .llm
        .ok_or_else(|| anyhow!("no model configured for calculator"))?;
    let messages = vec![
        ChatMessage::text("system", CALCULATOR_SYSTEM_PROMPT),
        ChatMessage::text(
            "user",
            format!("Calculate the result of the following expression: {expression}"),
        ),
    ];
    let response = llm.complete(&messages).await?;
    Ok(json!({ "result": response.content }))
}

fn run_get_date() -> Result<Value> {
    Ok(json!({ "result": Utc::now().to_rfc3339() }))
}

async fn run_web_search(context: &ToolContext<'_>, args: &Value) -> Result<Value> {
    let search_query = args
        .get("search_query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("web search requires a search query"))?;
    let original_query = args
        .get("original_query")
        .and_then(Value::as_str)
        .unwrap_or("");
    let date = args.get("date").and_then(Value::as_str).unwrap_or("");
    let number_of_results = args
        .get("number_of_results")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let llm = context
        .llm
        .ok_or_else(|| anyhow!("no model configured for web search"))?;
    let prompt = format!(
        "Search the web for the most relevant AI news for the last 24 hours.\n\
         User query: ({original_query})\n\
         Search query: ({search_query})\n\
         Current date: ({date})\n\
         Number of desired results: ({number_of_results})"
    );
    let messages = vec![
        ChatMessage::text("system", WEB_SEARCH_SYSTEM_PROMPT),
        ChatMessage::text("user", prompt),
    ];
    let response = llm.complete(&messages).await?;
    Ok(json!({ "result": response.content }))
}

async fn run_get_weather(context: &ToolContext<'_>, args: &Value) -> Result<Value> {
    let latitude = args
        .get("latitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("weather requires a latitude"))?;
    let longitude = args
        .get("longitude")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("weather requires a longitude"))?;
    let url = Url::parse_with_params(
        OPEN_METEO_FORECAST_URL,
        &[
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("current", "temperature_2m".to_string()),
            ("hourly", "temperature_2m".to_string()),
            ("daily", "sunrise,sunset".to_string()),
            ("timezone", "auto".to_string()),
        ],
    )?;
    let response = context.http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("weather request failed: {status}"));
    }
    let payload = response.json::<Value>().await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(http: &reqwest::Client) -> ToolContext<'_> {
        ToolContext { http, llm: None }
    }

    #[test]
    fn tool_definitions_cover_every_builtin() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), tool_specs().len());
        let names = defs
            .iter()
            .map(|def| def["function"]["name"].as_str().unwrap_or("").to_string())
            .collect::<Vec<_>>();
        assert!(names.contains(&TOOL_CALCULATOR.to_string()));
        assert!(names.contains(&TOOL_GET_DATE.to_string()));
        assert!(names.contains(&TOOL_WEB_SEARCH.to_string()));
        assert!(names.contains(&TOOL_GET_WEATHER.to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_returns_placeholder() {
        let http = reqwest::Client::new();
        let result = execute_tool(&context(&http), "no_such_tool", &json!({})).await;
        assert_eq!(result, json!({ "result": "Error executing tool" }));
    }

    #[tokio::test]
    async fn calculator_without_model_returns_placeholder() {
        let http = reqwest::Client::new();
        let result = execute_tool(
            &context(&http),
            TOOL_CALCULATOR,
            &json!({ "expression": "2+2" }),
        )
        .await;
        assert_eq!(result, json!({ "result": "Error performing calculation" }));
    }

    #[tokio::test]
    async fn calculator_without_expression_returns_placeholder() {
        let http = reqwest::Client::new();
        let result = execute_tool(&context(&http), TOOL_CALCULATOR, &json!({})).await;
        assert_eq!(result, json!({ "result": "Error performing calculation" }));
    }

    #[tokio::test]
    async fn get_date_returns_rfc3339() {
        let http = reqwest::Client::new();
        let result = execute_tool(&context(&http), TOOL_GET_DATE, &json!({})).await;
        let text = result["result"].as_str().expect("date string");
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
    }
}
