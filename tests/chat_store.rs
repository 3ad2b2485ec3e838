use driftchat_server::storage::{
    ChatRecord, MessageRecord, SqliteStorage, StorageBackend, UserAccountRecord, UserTokenRecord,
};
use driftchat_server::user_store::UserStore;
use std::sync::Arc;

fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn temp_storage(dir: &tempfile::TempDir) -> SqliteStorage {
    let db_path = dir.path().join("driftchat.db");
    let storage = SqliteStorage::new(db_path.to_string_lossy().to_string());
    storage.ensure_initialized().unwrap();
    storage
}

fn build_chat(chat_id: &str, user_id: &str, now: f64) -> ChatRecord {
    ChatRecord {
        chat_id: chat_id.to_string(),
        user_id: user_id.to_string(),
        title: "test chat".to_string(),
        created_at: now,
    }
}

fn build_message(chat_id: &str, role: &str, content: &str, now: f64) -> MessageRecord {
    MessageRecord {
        message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        chat_id: chat_id.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        tool_calls: None,
        tool_call_id: None,
        reasoning: None,
        created_at: now,
    }
}

#[test]
fn chat_round_trip_and_delete_cascades_messages() {
    let dir = tempfile::tempdir().unwrap();
    let storage = temp_storage(&dir);
    let now = now_ts();

    storage.save_chat(&build_chat("c1", "user_a", now)).unwrap();
    storage.save_chat(&build_chat("c2", "user_a", now)).unwrap();
    storage
        .save_messages(&[
            build_message("c1", "user", "2+2", now),
            build_message("c1", "assistant", "4", now),
            build_message("c2", "user", "untouched", now),
        ])
        .unwrap();

    let fetched = storage.get_chat("c1").unwrap().expect("chat exists");
    assert_eq!(fetched.user_id, "user_a");
    assert_eq!(fetched.title, "test chat");

    let affected = storage.delete_chat("c1").unwrap();
    assert_eq!(affected, 1);
    assert!(storage.get_chat("c1").unwrap().is_none());
    assert!(storage.list_messages("c1", 0).unwrap().is_empty());

    let remaining = storage.list_messages("c2", 0).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "untouched");
}

#[test]
fn messages_keep_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let storage = temp_storage(&dir);
    let now = now_ts();

    storage.save_chat(&build_chat("c1", "user_a", now)).unwrap();
    storage
        .save_messages(&[
            build_message("c1", "user", "first", now),
            build_message("c1", "assistant", "second", now),
            build_message("c1", "user", "third", now),
        ])
        .unwrap();

    let messages = storage.list_messages("c1", 0).unwrap();
    let contents = messages
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>();
    assert_eq!(contents, vec!["first", "second", "third"]);

    let limited = storage.list_messages("c1", 2).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn tool_call_columns_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage = temp_storage(&dir);
    let now = now_ts();

    storage.save_chat(&build_chat("c1", "user_a", now)).unwrap();
    let mut call_message = build_message("c1", "assistant", "", now);
    call_message.tool_calls = Some("[{\"id\":\"call_1\"}]".to_string());
    let mut result_message = build_message("c1", "tool", "{\"result\":\"4\"}", now);
    result_message.tool_call_id = Some("call_1".to_string());
    storage
        .save_messages(&[call_message, result_message])
        .unwrap();

    let messages = storage.list_messages("c1", 0).unwrap();
    assert_eq!(messages[0].tool_calls.as_deref(), Some("[{\"id\":\"call_1\"}]"));
    assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_1"));
}

#[test]
fn token_authentication_enforces_expiry_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(temp_storage(&dir));
    let now = now_ts();

    storage
        .upsert_user_account(&UserAccountRecord {
            user_id: "user_a".to_string(),
            username: "alice".to_string(),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    storage
        .upsert_user_account(&UserAccountRecord {
            user_id: "user_b".to_string(),
            username: "bob".to_string(),
            status: "disabled".to_string(),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    storage
        .create_user_token(&UserTokenRecord {
            token: "tok_live".to_string(),
            user_id: "user_a".to_string(),
            expires_at: now + 3600.0,
            created_at: now,
            last_used_at: now,
        })
        .unwrap();
    storage
        .create_user_token(&UserTokenRecord {
            token: "tok_expired".to_string(),
            user_id: "user_a".to_string(),
            expires_at: now - 1.0,
            created_at: now,
            last_used_at: now,
        })
        .unwrap();
    storage
        .create_user_token(&UserTokenRecord {
            token: "tok_disabled".to_string(),
            user_id: "user_b".to_string(),
            expires_at: now + 3600.0,
            created_at: now,
            last_used_at: now,
        })
        .unwrap();

    let user_store = UserStore::new(storage.clone());
    let session = user_store
        .authenticate_token("tok_live")
        .unwrap()
        .expect("live token resolves");
    assert_eq!(session.user.user_id, "user_a");

    assert!(user_store.authenticate_token("tok_expired").unwrap().is_none());
    assert!(user_store.authenticate_token("tok_disabled").unwrap().is_none());
    assert!(user_store.authenticate_token("tok_missing").unwrap().is_none());
    assert!(user_store.authenticate_token("").unwrap().is_none());
}
