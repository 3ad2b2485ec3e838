// Title generation: derive a short chat title from the first user message.
use crate::services::llm::{ChatMessage, LlmClient};
use tracing::warn;

pub const TITLE_MAX_CHARS: usize = 80;
pub const DEFAULT_CHAT_TITLE: &str = "New chat";
/// Preferred model table entry for title generation; resolution falls back
/// to the default chat model when absent.
pub const TITLE_MODEL_SELECTOR: &str = "title-model";

const TITLE_SYSTEM_PROMPT: &str = "You will generate a short title based on the first message a \
user begins a conversation with. Ensure it is not more than 80 characters long. The title should \
be a summary of the user's message. Do not use quotes or colons.";

pub async fn generate_title_from_user_message(llm: Option<&LlmClient>, message: &str) -> String {
    if let Some(client) = llm {
        if client.is_configured() {
            let messages = vec![
                ChatMessage::text("system", TITLE_SYSTEM_PROMPT),
                ChatMessage::text("user", message),
            ];
            match client.complete(&messages).await {
                Ok(response) => {
                    let title = clean_title(&response.content);
                    if !title.is_empty() {
                        return title;
                    }
                }
                Err(err) => warn!("title generation failed, using fallback: {err}"),
            }
        }
    }
    fallback_title(message)
}

fn clean_title(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or("").trim();
    let cleaned = first_line
        .trim_matches(|ch| ch == '"' || ch == '\'')
        .trim()
        .to_string();
    if cleaned.chars().count() > TITLE_MAX_CHARS {
        cleaned.chars().take(TITLE_MAX_CHARS).collect()
    } else {
        cleaned
    }
}

/// Derive a title from the message text directly when no model is available.
pub fn fallback_title(message: &str) -> String {
    let cleaned = message.trim().replace('\n', " ");
    if cleaned.is_empty() {
        return DEFAULT_CHAT_TITLE.to_string();
    }
    if cleaned.chars().count() > TITLE_MAX_CHARS {
        let mut output = cleaned.chars().take(TITLE_MAX_CHARS).collect::<String>();
        output.push_str("...");
        output
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_truncates_long_messages() {
        let message = "x".repeat(200);
        let title = fallback_title(&message);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn fallback_flattens_newlines_and_defaults_when_empty() {
        assert_eq!(fallback_title("what is\nthe weather"), "what is the weather");
        assert_eq!(fallback_title("   "), DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn clean_title_strips_quotes_and_extra_lines() {
        assert_eq!(clean_title("\"Weather question\"\nextra"), "Weather question");
        assert_eq!(clean_title(""), "");
    }

    #[tokio::test]
    async fn generate_without_model_uses_fallback() {
        let title = generate_title_from_user_message(None, "2+2").await;
        assert_eq!(title, "2+2");
    }
}
