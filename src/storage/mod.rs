// Storage module: persistence records and the backend trait over SQLite.

mod sqlite;

use crate::config::StorageConfig;
use anyhow::Result;
use std::sync::Arc;

pub use sqlite::SqliteStorage;

#[derive(Debug, Clone)]
pub struct ChatRecord {
    pub chat_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: f64,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    /// Serialized tool-call list for assistant messages that requested tools.
    pub tool_calls: Option<String>,
    /// Id of the originating call for tool-result messages.
    pub tool_call_id: Option<String>,
    pub reasoning: Option<String>,
    pub created_at: f64,
}

#[derive(Debug, Clone)]
pub struct UserAccountRecord {
    pub user_id: String,
    pub username: String,
    pub status: String,
    pub created_at: f64,
    pub updated_at: f64,
}

#[derive(Debug, Clone)]
pub struct UserTokenRecord {
    pub token: String,
    pub user_id: String,
    pub expires_at: f64,
    pub created_at: f64,
    pub last_used_at: f64,
}

pub trait StorageBackend: Send + Sync {
    fn ensure_initialized(&self) -> Result<()>;

    fn save_chat(&self, record: &ChatRecord) -> Result<()>;
    fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>>;
    /// Deletes the chat and all of its messages. Returns the number of
    /// deleted chat rows.
    fn delete_chat(&self, chat_id: &str) -> Result<i64>;

    fn save_messages(&self, records: &[MessageRecord]) -> Result<()>;
    fn list_messages(&self, chat_id: &str, limit: i64) -> Result<Vec<MessageRecord>>;

    fn upsert_user_account(&self, record: &UserAccountRecord) -> Result<()>;
    fn get_user_account(&self, user_id: &str) -> Result<Option<UserAccountRecord>>;

    fn create_user_token(&self, record: &UserTokenRecord) -> Result<()>;
    fn get_user_token(&self, token: &str) -> Result<Option<UserTokenRecord>>;
    fn touch_user_token(&self, token: &str, last_used_at: f64) -> Result<()>;
}

pub fn build_storage(config: &StorageConfig) -> Arc<dyn StorageBackend> {
    Arc::new(SqliteStorage::new(config.db_path.trim().to_string()))
}
