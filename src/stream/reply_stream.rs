//! 单条回复的有序分块流
//!
//! 持有序号计数与回复的取消令牌：序号分配与写出在同一把锁内完成，保证发送端看到的序号严格递增。
//! 取消后普通分块一律拒绝，只有终止分块（reply_end）仍会写出。
//! 已成功写出的 response / think 文本同时累积在流内，任何退出路径都能取回已流出的部分。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::ReplyError;
use crate::llm::{next_fragment, open_stream, ChatModel, GenerateOptions, Message, ModelFragment, ModelResponse};
use crate::memory::{ChatMessage, MessageType};
use crate::stream::{ChunkSender, ChunkType, MessageChunk, SendError};

/// fetch_source 等大负载按此字节数切分
pub const PAYLOAD_CHUNK_BYTES: usize = 512;

/// 终止分块文本
pub const REPLY_END_TEXT: &str = "Processing completed";

pub struct ReplyStream {
    sender: Arc<dyn ChunkSender>,
    session_id: String,
    message_id: String,
    reply_to: String,
    next_sequence: Mutex<u64>,
    token: CancellationToken,
    broken: AtomicBool,
    response_text: StdMutex<String>,
    think_text: StdMutex<String>,
}

impl ReplyStream {
    pub fn new(sender: Arc<dyn ChunkSender>, reply: &ChatMessage, token: CancellationToken) -> Self {
        Self {
            sender,
            session_id: reply.session_id.clone(),
            message_id: reply.id.clone(),
            reply_to: reply.reply_to_message.clone().unwrap_or_default(),
            next_sequence: Mutex::new(0),
            token,
            broken: AtomicBool::new(false),
            response_text: StdMutex::new(String::new()),
            think_text: StdMutex::new(String::new()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 取消后返回 Cancelled，供各挂起点直接 `?`
    pub fn check_cancelled(&self) -> Result<(), ReplyError> {
        if self.token.is_cancelled() {
            Err(ReplyError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 发送失败后为 true，后续普通分块直接失败
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub async fn send(&self, chunk_type: ChunkType, text: impl Into<String>) -> Result<(), ReplyError> {
        self.check_cancelled()?;
        if self.is_broken() {
            return Err(ReplyError::Transport(SendError::Closed));
        }
        let text = text.into();
        self.emit(MessageType::Assistant, chunk_type, text.clone()).await?;
        match chunk_type {
            ChunkType::Response => push(&self.response_text, &text),
            ChunkType::Think => push(&self.think_text, &text),
            _ => {}
        }
        Ok(())
    }

    /// 已写出的 response 文本
    pub fn response_text(&self) -> String {
        read(&self.response_text)
    }

    /// 已写出的 think 文本
    pub fn think_text(&self) -> String {
        read(&self.think_text)
    }

    /// 调用模型并把分片转发为分块：正文按 text_type，推理按 reasoning_type（None 则不转发）。
    /// 返回汇总后的完整响应（含工具调用分片）。
    pub async fn relay(
        &self,
        model: &dyn ChatModel,
        messages: &[Message],
        options: &GenerateOptions,
        text_type: ChunkType,
        reasoning_type: Option<ChunkType>,
    ) -> Result<ModelResponse, ReplyError> {
        let mut stream = open_stream(model, messages, options, &self.token).await?;
        let mut response = ModelResponse::default();
        while let Some(fragment) = next_fragment(&mut stream, &self.token).await? {
            match (&fragment, reasoning_type) {
                (ModelFragment::Text(t), _) if !t.is_empty() => self.send(text_type, t.as_str()).await?,
                (ModelFragment::Reasoning(r), Some(rt)) if !r.is_empty() => self.send(rt, r.as_str()).await?,
                _ => {}
            }
            response.absorb(&fragment);
        }
        Ok(response)
    }

    /// 按 512 字节切分发送（保证 UTF-8 边界）
    pub async fn send_payload(&self, chunk_type: ChunkType, payload: &str) -> Result<(), ReplyError> {
        for piece in split_payload(payload, PAYLOAD_CHUNK_BYTES) {
            self.send(chunk_type, piece).await?;
        }
        Ok(())
    }

    /// 终止分块：不受取消影响
    pub async fn send_end(&self) -> Result<(), ReplyError> {
        self.emit(MessageType::System, ChunkType::ReplyEnd, REPLY_END_TEXT.to_string())
            .await
    }

    async fn emit(&self, message_type: MessageType, chunk_type: ChunkType, text: String) -> Result<(), ReplyError> {
        let mut seq = self.next_sequence.lock().await;
        let chunk = MessageChunk {
            session_id: self.session_id.clone(),
            message_id: self.message_id.clone(),
            message_type,
            reply_to_message: self.reply_to.clone(),
            chunk_sequence: *seq,
            chunk_type,
            message_chunk: text,
            streaming: None,
            content_type: None,
        };
        *seq += 1;
        if let Err(e) = self.sender.send(&chunk).await {
            self.broken.store(true, Ordering::SeqCst);
            tracing::warn!(message_id = %self.message_id, error = %e, "failed to send chunk");
            return Err(e.into());
        }
        Ok(())
    }
}

fn push(buf: &StdMutex<String>, text: &str) {
    buf.lock().unwrap_or_else(|p| p.into_inner()).push_str(text);
}

fn read(buf: &StdMutex<String>) -> String {
    buf.lock().unwrap_or_else(|p| p.into_inner()).clone()
}

/// 按最大字节数切分字符串，不切断多字节字符
pub fn split_payload(payload: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            pieces.push(rest);
            break;
        }
        let mut end = max_bytes;
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // 单个字符超过 max_bytes
            end = rest.char_indices().nth(1).map(|(i, _)| i).unwrap_or(rest.len());
        }
        pieces.push(&rest[..end]);
        rest = &rest[end..];
    }
    pieces
}
