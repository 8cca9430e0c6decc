//! 分块协议：一次流式回复的线上单元
//!
//! 每个分块一个 JSON 对象；chunk_sequence 在同一回复内严格递增（允许跳号，不允许回退）。

use serde::{Deserialize, Serialize};

use crate::memory::MessageType;

/// 分块类型，对应产出它的处理阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    QueryIntent,
    FetchSource,
    PickSource,
    DeepRead,
    Think,
    Response,
    Tools,
    ReplyEnd,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::QueryIntent => "query_intent",
            ChunkType::FetchSource => "fetch_source",
            ChunkType::PickSource => "pick_source",
            ChunkType::DeepRead => "deep_read",
            ChunkType::Think => "think",
            ChunkType::Response => "response",
            ChunkType::Tools => "tools",
            ChunkType::ReplyEnd => "reply_end",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流式回复分块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    pub session_id: String,
    pub message_id: String,
    pub message_type: MessageType,
    pub reply_to_message: String,
    pub chunk_sequence: u64,
    pub chunk_type: ChunkType,
    pub message_chunk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl MessageChunk {
    /// 空文本的 response 分块：在任何 token 之前建立响应流，不是错误
    pub fn is_opener(&self) -> bool {
        self.chunk_type == ChunkType::Response && self.message_chunk.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.chunk_type == ChunkType::ReplyEnd
    }
}
