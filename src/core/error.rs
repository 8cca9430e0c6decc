//! 回复编排错误类型
//!
//! 各层错误（发送、存储、图执行）在编排层统一汇总为 ReplyError，由 finalizer 决定用户可见的结果。

use std::any::Any;

use thiserror::Error;

use crate::graph::GraphError;
use crate::llm::LlmError;
use crate::memory::StoreError;
use crate::stream::SendError;

/// 一次回复处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum ReplyError {
    /// 用户取消或进程关闭；不作为错误展示给用户
    #[error("Reply cancelled")]
    Cancelled,

    /// 客户端断开等发送失败：停止继续产出分块，但仍执行收尾
    #[error("Transport error: {0}")]
    Transport(#[from] SendError),

    #[error("LLM error: {0}")]
    Model(String),

    /// 缺少模型、模板变量等配置问题，终止当前回复
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Graph error: {0}")]
    Graph(GraphError),
}

impl ReplyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplyError::Cancelled)
    }

    /// 取消与发送失败不能被单个步骤吞掉，必须终止整条流水线
    pub fn aborts_pipeline(&self) -> bool {
        matches!(self, ReplyError::Cancelled | ReplyError::Transport(_))
    }
}

impl From<LlmError> for ReplyError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => ReplyError::Cancelled,
            other => ReplyError::Model(other.to_string()),
        }
    }
}

impl From<GraphError> for ReplyError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Cancelled => ReplyError::Cancelled,
            GraphError::Node(inner) => match inner.downcast::<ReplyError>() {
                Ok(reply) => *reply,
                Err(other) => ReplyError::Graph(GraphError::Node(other)),
            },
            other => ReplyError::Graph(other),
        }
    }
}

impl From<ReplyError> for GraphError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::Cancelled => GraphError::Cancelled,
            other => GraphError::node(other),
        }
    }
}

/// 取出 panic 负载中的文本
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
