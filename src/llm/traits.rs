//! 模型调用抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 ChatModel：generate 返回分片流（文本、推理、工具调用分片）。
//! 本层不拼装具体厂商的请求体之外的任何东西；读取流时统一响应取消令牌。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::{GenerateOptions, Message, ModelFragment, ModelResponse};

/// 模型分片流
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ModelFragment, String>> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM call cancelled")]
    Cancelled,

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM stream failed: {0}")]
    Stream(String),
}

/// 流式对话模型
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<FragmentStream, String>;

    fn name(&self) -> &str {
        "chat-model"
    }
}

/// 发起调用；等待首包期间同样响应取消
pub async fn open_stream(
    model: &dyn ChatModel,
    messages: &[Message],
    options: &GenerateOptions,
    token: &CancellationToken,
) -> Result<FragmentStream, LlmError> {
    if token.is_cancelled() {
        return Err(LlmError::Cancelled);
    }
    tokio::select! {
        _ = token.cancelled() => Err(LlmError::Cancelled),
        result = model.generate(messages, options) => result.map_err(LlmError::Request),
    }
}

/// 读取下一个分片；None 表示流结束
pub async fn next_fragment(
    stream: &mut FragmentStream,
    token: &CancellationToken,
) -> Result<Option<ModelFragment>, LlmError> {
    tokio::select! {
        _ = token.cancelled() => Err(LlmError::Cancelled),
        item = stream.next() => match item {
            None => Ok(None),
            Some(Ok(fragment)) => Ok(Some(fragment)),
            Some(Err(e)) => Err(LlmError::Stream(e)),
        },
    }
}

/// 非流式场景：读完整个流并汇总
pub async fn generate_collect(
    model: &dyn ChatModel,
    messages: &[Message],
    options: &GenerateOptions,
    token: &CancellationToken,
) -> Result<ModelResponse, LlmError> {
    let mut stream = open_stream(model, messages, options, token).await?;
    let mut response = ModelResponse::default();
    while let Some(fragment) = next_fragment(&mut stream, token).await? {
        response.absorb(&fragment);
    }
    Ok(response)
}
