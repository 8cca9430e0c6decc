//! 脚本化模型（用于测试，无需 API）
//!
//! 按顺序弹出预置的回合；也可用 responder 闭包按输入决定回合（并发调用时顺序不确定的场景）。
//! 回合可以是分片序列、错误或 panic；可设置每个分片前的延迟以模拟流式输出。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{ChatModel, FragmentStream, GenerateOptions, Message, ModelFragment, ToolCall, ToolCallFragment};

/// 一次 generate 调用的预置结果
#[derive(Clone, Debug)]
pub enum ScriptedTurn {
    Fragments(Vec<ModelFragment>),
    Error(String),
    Panic(String),
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedTurn::Fragments(vec![ModelFragment::Text(text.into())])
    }

    /// 按空白切成多个文本分片
    pub fn streamed_text(text: &str) -> Self {
        ScriptedTurn::Fragments(
            text.split_inclusive(' ')
                .map(|t| ModelFragment::Text(t.to_string()))
                .collect(),
        )
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        ScriptedTurn::Fragments(
            calls
                .into_iter()
                .map(|c| ModelFragment::ToolCall(ToolCallFragment::from(c)))
                .collect(),
        )
    }
}

type Responder = dyn Fn(&[Message], &GenerateOptions) -> ScriptedTurn + Send + Sync;

/// 脚本化模型
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    responder: Option<Box<Responder>>,
    fallback_text: String,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            responder: None,
            fallback_text: "OK".to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&[Message], &GenerateOptions) -> ScriptedTurn + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    pub fn then(self, turn: ScriptedTurn) -> Self {
        self.lock_turns().push_back(turn);
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(ScriptedTurn::text(text))
    }

    pub fn then_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.then(ScriptedTurn::tool_calls(calls))
    }

    /// 脚本耗尽后返回的文本
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = text.into();
        self
    }

    /// 每个分片前的延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用收到的消息
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_turns(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedTurn>> {
        self.turns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_turn(&self, messages: &[Message], options: &GenerateOptions) -> ScriptedTurn {
        if let Some(turn) = self.lock_turns().pop_front() {
            return turn;
        }
        match &self.responder {
            Some(responder) => responder(messages, options),
            None => ScriptedTurn::text(self.fallback_text.clone()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<FragmentStream, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(messages.to_vec());

        match self.next_turn(messages, options) {
            ScriptedTurn::Error(e) => Err(e),
            ScriptedTurn::Panic(msg) => panic!("{}", msg),
            ScriptedTurn::Fragments(fragments) => {
                let delay = self.delay;
                let s = stream::iter(fragments).then(move |f| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(f)
                });
                Ok(Box::pin(s))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::generate_collect;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_turns_then_fallback() {
        let model = ScriptedModel::new().then_text("first").with_fallback("later");
        let token = CancellationToken::new();
        let opts = GenerateOptions::default();

        let r1 = generate_collect(&model, &[Message::user("hi")], &opts, &token).await.unwrap();
        let r2 = generate_collect(&model, &[Message::user("hi")], &opts, &token).await.unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "later");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_responder_sees_messages() {
        let model = ScriptedModel::from_fn(|messages, _| {
            ScriptedTurn::text(format!("echo {}", messages.last().map(|m| m.content.as_str()).unwrap_or("")))
        });
        let token = CancellationToken::new();
        let r = generate_collect(&model, &[Message::user("ping")], &GenerateOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(r.text, "echo ping");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_slow_stream() {
        let model = ScriptedModel::new()
            .then(ScriptedTurn::streamed_text("a b c d e f"))
            .with_delay(Duration::from_millis(50));
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            cancel.cancel();
        });
        let result = generate_collect(&model, &[Message::user("x")], &GenerateOptions::default(), &token).await;
        assert_eq!(result, Err(crate::llm::LlmError::Cancelled));
    }

    #[tokio::test]
    async fn test_error_turn() {
        let model = ScriptedModel::new().then(ScriptedTurn::Error("quota".into()));
        let token = CancellationToken::new();
        let result = generate_collect(&model, &[], &GenerateOptions::default(), &token).await;
        assert!(matches!(result, Err(crate::llm::LlmError::Request(e)) if e == "quota"));
    }
}
