//! 网关消息协议
//!
//! 入站：客户端命令（send_message / cancel / ping），以 `type` 字段区分。
//! 出站：回复分块按原样序列化，每帧一个 JSON；命令的应答为 [`ServerEvent`]。

use serde::{Deserialize, Serialize};

/// 客户端命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// 发送用户消息，触发一次回复
    SendMessage {
        session_id: String,
        message: String,
        /// 可选：指定助手 ID
        #[serde(default)]
        assistant_id: Option<String>,
    },

    /// 取消一条在途回复；message_id 为被回复的用户消息 ID
    Cancel { session_id: String, message_id: String },

    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

/// 网关对命令的应答
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 用户消息已持久化，回复任务已启动
    Accepted {
        session_id: String,
        message_id: String,
        reply_id: String,
    },

    CancelResult {
        session_id: String,
        message_id: String,
        cancelled: bool,
    },

    Pong { timestamp: Option<i64> },

    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
