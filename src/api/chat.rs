// Chat endpoints: streaming chat creation and chat deletion.
use crate::api::errors::{error_response, error_response_with_code};
use crate::auth;
use crate::orchestrator::{ChatExecution, EventEmitter};
use crate::schemas::{most_recent_user_message, ChatRequest, StreamEvent};
use crate::services::title::{generate_title_from_user_message, TITLE_MODEL_SELECTOR};
use crate::state::AppState;
use crate::storage::{ChatRecord, MessageRecord};
use crate::user_store::UserSession;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

const SSE_KEEP_ALIVE_S: u64 = 15;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(post_chat).delete(delete_chat))
}

#[derive(Debug, Deserialize)]
struct DeleteChatQuery {
    #[serde(default)]
    id: Option<String>,
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let request: ChatRequest = serde_json::from_slice(&body).map_err(|err| {
        error_response_with_code(
            StatusCode::BAD_REQUEST,
            Some("INVALID_JSON"),
            format!("invalid request body: {err}"),
        )
    })?;
    let session = resolve_session(&state, &headers)?;
    let user_message = most_recent_user_message(&request.messages)
        .cloned()
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "No user message found"))?;

    let chat = state
        .storage
        .get_chat(&request.id)
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    let now = now_ts();
    match chat {
        None => {
            let title_llm = state.llm_client(Some(TITLE_MODEL_SELECTOR));
            let title =
                generate_title_from_user_message(title_llm.as_ref(), &user_message.content).await;
            state
                .storage
                .save_chat(&ChatRecord {
                    chat_id: request.id.clone(),
                    user_id: session.user.user_id.clone(),
                    title,
                    created_at: now,
                })
                .map_err(|err| {
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                })?;
        }
        Some(chat) if chat.user_id != session.user.user_id => {
            return Err(error_response(StatusCode::UNAUTHORIZED, "Unauthorized"));
        }
        Some(_) => {}
    }

    state
        .storage
        .save_messages(&[MessageRecord {
            message_id: user_message
                .id
                .clone()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple())),
            chat_id: request.id.clone(),
            role: "user".to_string(),
            content: user_message.content.clone(),
            tool_calls: None,
            tool_call_id: None,
            reasoning: None,
            created_at: now,
        }])
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let (event_tx, event_rx) =
        mpsc::channel::<StreamEvent>(state.config.server.stream_queue_size.max(1));
    let emitter = EventEmitter::new(event_tx);
    let orchestrator = state.orchestrator.clone();
    let execution = ChatExecution {
        user_id: session.user.user_id.clone(),
        chat_id: request.id.clone(),
        selected_model: request.selected_chat_model.clone(),
        messages: request.messages.clone(),
    };
    // Failures inside the run become error frames in the already-open stream.
    tokio::spawn(async move {
        if let Err(err) = orchestrator.execute(execution, emitter.clone()).await {
            emitter
                .emit(
                    "error",
                    json!({
                        "code": err.code(),
                        "message": format!("Oops, an error occurred! {err}"),
                    }),
                )
                .await;
        }
    });

    let stream = ReceiverStream::new(event_rx).map(|event: StreamEvent| {
        Ok::<Event, std::convert::Infallible>(
            Event::default().event(event.event).data(event.data.to_string()),
        )
    });
    let sse = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_S)));
    Ok(sse.into_response())
}

async fn delete_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DeleteChatQuery>,
) -> Result<Response, Response> {
    let chat_id = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Not Found"))?;
    let session = resolve_session(&state, &headers)?;

    let chat = state
        .storage
        .get_chat(&chat_id)
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Chat not found"))?;
    if chat.user_id != session.user.user_id {
        return Err(error_response(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    state
        .storage
        .delete_chat(&chat_id)
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(Json(json!({ "data": { "id": chat_id, "message": "Chat deleted" } })).into_response())
}

fn resolve_session(state: &AppState, headers: &HeaderMap) -> Result<UserSession, Response> {
    let token = auth::extract_bearer_token(headers)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    let session = state
        .user_store
        .authenticate_token(&token)
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    session.ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Unauthorized"))
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
