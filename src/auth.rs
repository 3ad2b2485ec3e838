// Auth helpers: bearer token extraction from request headers.
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?;
    let text = value.to_str().ok()?.trim();
    if let Some(prefix) = text.get(..7) {
        if prefix.eq_ignore_ascii_case("bearer ") {
            if let Some(raw) = text.get(7..) {
                let cleaned = raw.trim();
                if !cleaned.is_empty() {
                    return Some(cleaned.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_token_case_insensitively() {
        assert_eq!(
            extract_bearer_token(&headers_with("Bearer tok_123")),
            Some("tok_123".to_string())
        );
        assert_eq!(
            extract_bearer_token(&headers_with("bearer tok_123")),
            Some("tok_123".to_string())
        );
    }

    #[test]
    fn rejects_missing_or_empty_tokens() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
        assert_eq!(extract_bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(extract_bearer_token(&headers_with("Basic abc")), None);
    }
}
