//! 回复收尾
//!
//! 每条回复恰好收尾一次：写入回复正文与推理详情、失败时给出错误文本、持久化、发送 reply_end、移除注册表条目。
//! 正常路径由 [`ReplyFinalizer::finish`] 执行；任务在收尾前被丢弃（例如 JoinHandle::abort）时，
//! Drop 会把同样的收尾工作交给运行时。

use std::sync::Arc;

use chrono::Utc;

use crate::core::{ReplyError, TaskGuard};
use crate::memory::{ChatMessage, MessageStore, ProcessingDetail};
use crate::stream::{ChunkType, ReplyStream};

/// 流水线的退出方式
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Failed(ReplyError),
    Panicked(String),
    /// 任务在收尾前被丢弃
    Abandoned,
}

/// 用户可见的错误文本
pub fn error_text(detail: &str) -> String {
    format!("⚠️ error in async processing message reply, {}", detail)
}

struct Finalize {
    store: Arc<dyn MessageStore>,
    stream: Arc<ReplyStream>,
    guard: TaskGuard,
}

impl Finalize {
    async fn run(self, reply: &mut ChatMessage, outcome: Outcome) {
        let streamed = self.stream.response_text();
        if reply.message.is_empty() && !streamed.is_empty() {
            reply.message = streamed;
        }
        let reasoning = self.stream.think_text();
        if !reasoning.is_empty() && !reply.details.iter().any(|d| d.order == ProcessingDetail::REASONING) {
            reply.push_detail(ProcessingDetail::described(
                ProcessingDetail::REASONING,
                ChunkType::Think,
                reasoning,
            ));
        }

        match &outcome {
            Outcome::Completed => {
                tracing::info!(message_id = %reply.id, len = reply.message.len(), "reply completed");
            }
            Outcome::Failed(e) if e.is_cancelled() => {
                tracing::info!(message_id = %reply.id, partial_len = reply.message.len(), "reply cancelled");
            }
            Outcome::Abandoned => {
                tracing::warn!(message_id = %reply.id, "reply task dropped before completion");
            }
            Outcome::Failed(ReplyError::Transport(e)) => {
                tracing::warn!(message_id = %reply.id, error = %e, "client went away, reply stopped");
            }
            Outcome::Failed(e) => {
                tracing::error!(message_id = %reply.id, error = %e, "reply failed");
                self.surface_error(reply, &e.to_string()).await;
            }
            Outcome::Panicked(p) => {
                tracing::error!(message_id = %reply.id, panic = %p, "reply pipeline panicked");
                self.surface_error(reply, p).await;
            }
        }

        reply.updated = Utc::now();
        if let Err(e) = self.store.save_message(reply).await {
            tracing::error!(message_id = %reply.id, error = %e, "failed to save assistant message");
        }
        if let Err(e) = self.stream.send_end().await {
            tracing::debug!(message_id = %reply.id, error = %e, "failed to send reply_end");
        }
        drop(self.guard);
    }

    async fn surface_error(&self, reply: &mut ChatMessage, detail: &str) {
        if !reply.message.is_empty() {
            return;
        }
        let text = error_text(detail);
        reply.message = text.clone();
        if let Err(e) = self.stream.send(ChunkType::Response, text).await {
            tracing::debug!(error = %e, "could not stream error text");
        }
    }
}

/// 持有回复消息的收尾守卫
pub struct ReplyFinalizer {
    reply: ChatMessage,
    pending: Option<Finalize>,
}

impl ReplyFinalizer {
    pub fn new(reply: ChatMessage, store: Arc<dyn MessageStore>, stream: Arc<ReplyStream>, guard: TaskGuard) -> Self {
        Self {
            reply,
            pending: Some(Finalize { store, stream, guard }),
        }
    }

    /// 流水线运行期间追加步骤详情、写入正文
    pub fn reply_mut(&mut self) -> &mut ChatMessage {
        &mut self.reply
    }

    /// 执行收尾并返回持久化后的回复
    pub async fn finish(mut self, outcome: Outcome) -> ChatMessage {
        let mut reply = self.reply.clone();
        if let Some(finalize) = self.pending.take() {
            finalize.run(&mut reply, outcome).await;
        }
        reply
    }
}

impl Drop for ReplyFinalizer {
    fn drop(&mut self) {
        let Some(finalize) = self.pending.take() else {
            return;
        };
        let mut reply = self.reply.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    finalize.run(&mut reply, Outcome::Abandoned).await;
                });
            }
            Err(_) => {
                tracing::error!(message_id = %reply.id, "no runtime to finalize dropped reply");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_util::sync::CancellationToken;

    use crate::core::{TaskKey, TaskRegistry};
    use crate::memory::InMemoryStore;
    use crate::stream::RecordingChunkSender;

    struct Fixture {
        finalizer: ReplyFinalizer,
        sender: Arc<RecordingChunkSender>,
        store: Arc<InMemoryStore>,
        registry: Arc<TaskRegistry>,
        stream: Arc<ReplyStream>,
        token: CancellationToken,
    }

    fn fixture() -> Fixture {
        let sender = Arc::new(RecordingChunkSender::new());
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(TaskRegistry::new());
        let request = ChatMessage::user("s1", "q");
        let reply = ChatMessage::reply_to(&request, None);
        let token = CancellationToken::new();
        let registration = registry.register(TaskKey::new("s1", request.id.clone()), token.clone(), None);
        let stream = Arc::new(ReplyStream::new(sender.clone(), &reply, token.clone()));
        let finalizer = ReplyFinalizer::new(
            reply,
            store.clone(),
            Arc::clone(&stream),
            TaskGuard::new(registry.clone(), registration),
        );
        Fixture {
            finalizer,
            sender,
            store,
            registry,
            stream,
            token,
        }
    }

    #[tokio::test]
    async fn test_completed_keeps_streamed_text() {
        let f = fixture();
        f.stream.send(ChunkType::Response, "partial ").await.unwrap();
        f.stream.send(ChunkType::Response, "answer").await.unwrap();
        f.stream.send(ChunkType::Think, "hmm").await.unwrap();

        let reply = f.finalizer.finish(Outcome::Completed).await;
        assert_eq!(reply.message, "partial answer");
        assert_eq!(reply.details[0].order, ProcessingDetail::REASONING);
        assert_eq!(f.sender.count(ChunkType::ReplyEnd), 1);
        assert!(f.registry.is_empty());
        assert_eq!(f.store.get_message(&reply.id).await.unwrap().message, "partial answer");
    }

    #[tokio::test]
    async fn test_panic_surfaces_error_once() {
        let f = fixture();
        let reply = f.finalizer.finish(Outcome::Panicked("boom".into())).await;
        assert_eq!(reply.message, error_text("boom"));
        assert_eq!(f.sender.text_of(ChunkType::Response), error_text("boom"));
        let chunks = f.sender.chunks();
        assert_eq!(chunks.last().unwrap().chunk_type, ChunkType::ReplyEnd);
        assert_eq!(f.sender.count(ChunkType::ReplyEnd), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_overwrite_partial_text() {
        let f = fixture();
        f.stream.send(ChunkType::Response, "half").await.unwrap();
        let reply = f
            .finalizer
            .finish(Outcome::Failed(ReplyError::Model("stream broke".into())))
            .await;
        assert_eq!(reply.message, "half");
        assert_eq!(f.sender.count(ChunkType::Response), 1);
    }

    #[tokio::test]
    async fn test_cancelled_persists_without_error_text() {
        let f = fixture();
        f.token.cancel();
        let reply = f.finalizer.finish(Outcome::Failed(ReplyError::Cancelled)).await;
        assert!(reply.message.is_empty());
        assert_eq!(f.sender.count(ChunkType::Response), 0);
        assert_eq!(f.sender.count(ChunkType::ReplyEnd), 1);
        assert!(f.store.get_message(&reply.id).await.is_some());
    }

    #[tokio::test]
    async fn test_drop_finalizes_on_runtime() {
        let f = fixture();
        let reply_id = f.finalizer.reply.id.clone();
        drop(f.finalizer);
        for _ in 0..50 {
            if f.sender.count(ChunkType::ReplyEnd) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(f.sender.count(ChunkType::ReplyEnd), 1);
        assert!(f.store.get_message(&reply_id).await.is_some());
        assert!(f.registry.is_empty());
    }
}
