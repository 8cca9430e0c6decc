//! 分块发送端
//!
//! - ChannelChunkSender：网络型发送端，序列化后立即写出；每次写入前非阻塞检查连接是否已关闭
//! - MemoryChunkSender：同步 / 程序化调用使用，只拼接 response 分块
//! - RecordingChunkSender：记录全部分块，可在第 N 次后模拟断开

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::stream::{ChunkType, MessageChunk};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Connection closed")]
    Closed,

    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// 分块接收端抽象；返回错误表示后续分块不应再产出
#[async_trait]
pub trait ChunkSender: Send + Sync {
    async fn send(&self, chunk: &MessageChunk) -> Result<(), SendError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 网络发送端：每个分块序列化为一行 JSON 写入连接的发送队列
pub struct ChannelChunkSender {
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl ChannelChunkSender {
    pub fn new(tx: mpsc::UnboundedSender<String>, closed: CancellationToken) -> Self {
        Self { tx, closed }
    }

    /// 连接关闭信号（传输层在断开时取消）
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[async_trait]
impl ChunkSender for ChannelChunkSender {
    async fn send(&self, chunk: &MessageChunk) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        let json = serde_json::to_string(chunk).map_err(|e| SendError::Serialize(e.to_string()))?;
        self.tx.send(json).map_err(|_| {
            self.closed.cancel();
            SendError::Closed
        })
    }
}

/// 内存发送端：只保留非空 response 分块
#[derive(Default)]
pub struct MemoryChunkSender {
    responses: Mutex<Vec<String>>,
}

impl MemoryChunkSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn final_response(&self) -> String {
        lock(&self.responses).concat()
    }
}

#[async_trait]
impl ChunkSender for MemoryChunkSender {
    async fn send(&self, chunk: &MessageChunk) -> Result<(), SendError> {
        if chunk.chunk_type == ChunkType::Response && !chunk.message_chunk.is_empty() {
            lock(&self.responses).push(chunk.message_chunk.clone());
        }
        Ok(())
    }
}

/// 记录全部分块的发送端
#[derive(Default)]
pub struct RecordingChunkSender {
    chunks: Mutex<Vec<MessageChunk>>,
    fail_after: Option<usize>,
}

impl RecordingChunkSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 成功写入 n 个分块后，后续写入均返回 Closed
    pub fn failing_after(n: usize) -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    pub fn chunks(&self) -> Vec<MessageChunk> {
        lock(&self.chunks).clone()
    }

    pub fn count(&self, chunk_type: ChunkType) -> usize {
        lock(&self.chunks)
            .iter()
            .filter(|c| c.chunk_type == chunk_type)
            .count()
    }

    /// 指定类型分块的文本拼接
    pub fn text_of(&self, chunk_type: ChunkType) -> String {
        lock(&self.chunks)
            .iter()
            .filter(|c| c.chunk_type == chunk_type)
            .map(|c| c.message_chunk.as_str())
            .collect()
    }
}

#[async_trait]
impl ChunkSender for RecordingChunkSender {
    async fn send(&self, chunk: &MessageChunk) -> Result<(), SendError> {
        let mut chunks = lock(&self.chunks);
        if let Some(limit) = self.fail_after {
            if chunks.len() >= limit {
                return Err(SendError::Closed);
            }
        }
        chunks.push(chunk.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageType;

    fn chunk(chunk_type: ChunkType, text: &str, seq: u64) -> MessageChunk {
        MessageChunk {
            session_id: "s1".into(),
            message_id: "r1".into(),
            message_type: MessageType::Assistant,
            reply_to_message: "m1".into(),
            chunk_sequence: seq,
            chunk_type,
            message_chunk: text.into(),
            streaming: None,
            content_type: None,
        }
    }

    #[tokio::test]
    async fn test_memory_sender_keeps_response_only() {
        let sender = MemoryChunkSender::new();
        sender.send(&chunk(ChunkType::Response, "", 0)).await.unwrap();
        sender.send(&chunk(ChunkType::Think, "hmm", 1)).await.unwrap();
        sender.send(&chunk(ChunkType::Response, "4", 2)).await.unwrap();
        sender.send(&chunk(ChunkType::Response, ".", 3)).await.unwrap();
        assert_eq!(sender.final_response(), "4.");
    }

    #[tokio::test]
    async fn test_channel_sender_checks_closed_before_write() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let sender = ChannelChunkSender::new(tx, closed.clone());

        sender.send(&chunk(ChunkType::Response, "a", 0)).await.unwrap();
        let line = rx.recv().await.unwrap();
        assert!(line.contains("\"message_chunk\":\"a\""));

        closed.cancel();
        assert_eq!(sender.send(&chunk(ChunkType::Response, "b", 1)).await, Err(SendError::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_sender_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let sender = ChannelChunkSender::new(tx, closed.clone());
        drop(rx);
        assert_eq!(sender.send(&chunk(ChunkType::Response, "a", 0)).await, Err(SendError::Closed));
        assert!(closed.is_cancelled());
    }

    #[tokio::test]
    async fn test_recording_sender_fails_after_limit() {
        let sender = RecordingChunkSender::failing_after(1);
        assert!(sender.send(&chunk(ChunkType::Response, "a", 0)).await.is_ok());
        assert!(sender.send(&chunk(ChunkType::Response, "b", 1)).await.is_err());
        assert_eq!(sender.chunks().len(), 1);
    }
}
