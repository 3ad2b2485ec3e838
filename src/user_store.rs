// Session resolution: bearer tokens map to stored accounts. Token issuance
// happens outside this service, the store only validates.
use crate::storage::{StorageBackend, UserAccountRecord};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

pub const USER_STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone)]
pub struct UserSession {
    pub user: UserAccountRecord,
}

pub struct UserStore {
    storage: Arc<dyn StorageBackend>,
}

impl UserStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Resolve a bearer token to a live session. Expired tokens, missing
    /// accounts and disabled accounts all resolve to `None`.
    pub fn authenticate_token(&self, token: &str) -> Result<Option<UserSession>> {
        let cleaned = token.trim();
        if cleaned.is_empty() {
            return Ok(None);
        }
        let Some(record) = self.storage.get_user_token(cleaned)? else {
            return Ok(None);
        };
        let now = now_ts();
        if record.expires_at > 0.0 && record.expires_at <= now {
            return Ok(None);
        }
        let Some(user) = self.storage.get_user_account(&record.user_id)? else {
            return Ok(None);
        };
        if user.status != USER_STATUS_ACTIVE {
            return Ok(None);
        }
        let _ = self.storage.touch_user_token(&record.token, now);
        Ok(Some(UserSession { user }))
    }
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
