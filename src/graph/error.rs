//! 图引擎错误类型

use thiserror::Error;

use crate::llm::LlmError;

/// 图编译与执行错误
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Entry point not set")]
    MissingEntryPoint,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node {0} has more than one outgoing edge")]
    DuplicateEdge(String),

    #[error("Node {0} has no outgoing edge")]
    DanglingNode(String),

    #[error("Invalid reducer: {0}")]
    InvalidReducer(String),

    #[error("Graph execution cancelled")]
    Cancelled,

    /// 节点自身的失败，保留原始错误供上层还原
    #[error("Node failed: {0}")]
    Node(Box<dyn std::error::Error + Send + Sync>),
}

impl GraphError {
    pub fn node(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        GraphError::Node(err.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GraphError::Cancelled)
    }
}

impl From<LlmError> for GraphError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => GraphError::Cancelled,
            other => GraphError::node(other),
        }
    }
}
