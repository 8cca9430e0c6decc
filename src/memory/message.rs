//! 会话与消息模型
//!
//! 用户消息在后台任务启动前同步创建并持久化；助手回复在任务开始时于内存中创建，
//! 任务结束时（成功、取消或失败）恰好持久化一次。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::ChunkType;

/// 消息类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Assistant,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageType::User),
            "assistant" => Some(MessageType::Assistant),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

/// 会话：首条用户消息时创建；后台任务不直接修改，只通过持久化的回复体现
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub visible: bool,
    pub status: SessionStatus,
    pub title: Option<String>,
    /// 用户手动改过标题后不再自动命名
    pub manually_renamed_title: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            visible: true,
            status: SessionStatus::Active,
            title: None,
            manually_renamed_title: false,
            created: now,
            updated: now,
        }
    }

    pub fn open(&mut self) {
        self.status = SessionStatus::Active;
        self.updated = Utc::now();
    }

    pub fn close(&mut self) {
        self.status = SessionStatus::Closed;
        self.updated = Utc::now();
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.manually_renamed_title = true;
        self.updated = Utc::now();
    }
}

/// 单个编排步骤的输出记录；order 固定，客户端据此稳定排序
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDetail {
    pub order: u32,
    #[serde(rename = "type")]
    pub detail_type: ChunkType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProcessingDetail {
    pub const INTENT: u32 = 10;
    pub const FETCH: u32 = 20;
    pub const PICK: u32 = 30;
    pub const DEEP_READ: u32 = 40;
    pub const REASONING: u32 = 50;
    pub const RESPONSE: u32 = 60;

    pub fn described(order: u32, detail_type: ChunkType, description: impl Into<String>) -> Self {
        Self {
            order,
            detail_type,
            description: description.into(),
            payload: None,
        }
    }

    pub fn with_payload(order: u32, detail_type: ChunkType, payload: serde_json::Value) -> Self {
        Self {
            order,
            detail_type,
            description: String::new(),
            payload: Some(payload),
        }
    }
}

/// 用户或助手的一轮消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub message_type: MessageType,
    pub message: String,
    #[serde(default)]
    pub details: Vec<ProcessingDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl ChatMessage {
    fn new(session_id: &str, message_type: MessageType, message: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            message_type,
            message,
            details: Vec::new(),
            reply_to_message: None,
            assistant_id: None,
            created: now,
            updated: now,
        }
    }

    pub fn user(session_id: &str, message: impl Into<String>) -> Self {
        Self::new(session_id, MessageType::User, message.into())
    }

    /// 空的助手回复，回复给 request
    pub fn reply_to(request: &ChatMessage, assistant_id: Option<String>) -> Self {
        let mut reply = Self::new(&request.session_id, MessageType::Assistant, String::new());
        reply.reply_to_message = Some(request.id.clone());
        reply.assistant_id = assistant_id;
        reply
    }

    pub fn push_detail(&mut self, detail: ProcessingDetail) {
        self.details.push(detail);
    }

    /// 按 order 稳定排序后的步骤（不修改原始追加顺序）
    pub fn ordered_details(&self) -> Vec<&ProcessingDetail> {
        let mut details: Vec<&ProcessingDetail> = self.details.iter().collect();
        details.sort_by_key(|d| d.order);
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_links_request() {
        let request = ChatMessage::user("s1", "hello");
        let reply = ChatMessage::reply_to(&request, Some("default".into()));
        assert_eq!(reply.session_id, "s1");
        assert_eq!(reply.reply_to_message.as_deref(), Some(request.id.as_str()));
        assert_eq!(reply.message_type, MessageType::Assistant);
        assert!(reply.message.is_empty());
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn test_ordered_details() {
        let mut reply = ChatMessage::user("s1", "");
        reply.push_detail(ProcessingDetail::described(ProcessingDetail::REASONING, ChunkType::Think, "r"));
        reply.push_detail(ProcessingDetail::described(ProcessingDetail::INTENT, ChunkType::QueryIntent, "i"));
        reply.push_detail(ProcessingDetail::described(ProcessingDetail::DEEP_READ, ChunkType::DeepRead, "d"));
        let orders: Vec<u32> = reply.ordered_details().iter().map(|d| d.order).collect();
        assert_eq!(orders, vec![10, 40, 50]);
        assert_eq!(reply.details[0].order, 50);
    }

    #[test]
    fn test_detail_serializes_type_tag() {
        let d = ProcessingDetail::described(ProcessingDetail::PICK, ChunkType::PickSource, "x");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["type"], "pick_source");
        assert_eq!(v["order"], 30);
        assert!(v.get("payload").is_none());
    }

    #[test]
    fn test_message_json_keeps_timestamps() {
        let request = ChatMessage::user("s1", "hello");
        let json = serde_json::to_string(&request).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, request.id);
        assert_eq!(back.created, request.created);
        assert_eq!(back.updated, request.updated);
    }

    #[test]
    fn test_session_rename() {
        let mut s = Session::new("s1");
        assert!(!s.manually_renamed_title);
        s.rename("Trip plan");
        s.close();
        assert!(s.manually_renamed_title);
        assert_eq!(s.status, SessionStatus::Closed);
    }
}
