//! 消息持久化抽象
//!
//! MessageStore：save（按 id upsert）与 load（最新在前，限制条数）；
//! InMemoryStore 为默认实现，SQLite 实现见 sqlite_store（feature = "async-sqlite"）。

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::{ChatMessage, Session};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialize(e.to_string())
    }
}

/// 会话与消息存储
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 保存消息；同 id 覆盖
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// 加载会话最近的 limit 条消息，最新在前
    async fn load_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
}

/// 内存存储：按会话保存插入顺序
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 会话内全部消息（按写入顺序）
    pub async fn all_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_message(&self, message_id: &str) -> Option<ChatMessage> {
        self.messages
            .read()
            .await
            .values()
            .flat_map(|msgs| msgs.iter())
            .find(|m| m.id == message_id)
            .cloned()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let list = messages.entry(message.session_id.clone()).or_default();
        match list.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => list.push(message.clone()),
        }
        Ok(())
    }

    async fn load_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(session_id)
            .map(|list| list.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_most_recent_first() {
        let store = InMemoryStore::new();
        for text in ["a", "b", "c"] {
            store.save_message(&ChatMessage::user("s1", text)).await.unwrap();
        }
        store.save_message(&ChatMessage::user("s2", "other")).await.unwrap();

        let loaded = store.load_messages("s1", 2).await.unwrap();
        let texts: Vec<&str> = loaded.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["c", "b"]);
        assert!(store.load_messages("missing", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_upserts_by_id() {
        let store = InMemoryStore::new();
        let mut msg = ChatMessage::user("s1", "draft");
        store.save_message(&msg).await.unwrap();
        msg.message = "final".into();
        store.save_message(&msg).await.unwrap();

        let all = store.all_messages("s1").await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "final");
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.get_session("s1").await.unwrap().is_none());
        store.save_session(&Session::new("s1")).await.unwrap();
        assert!(store.get_session("s1").await.unwrap().is_some());
    }
}
