//! Hive - 流式多步助手回复编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务注册表、优雅关闭、研究并发限流
//! - **gateway**: WebSocket 传输层（feature = "gateway"）
//! - **graph**: 有向图执行引擎（命名节点 + 带 reducer 的共享状态）
//! - **llm**: 模型调用抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话与消息模型、持久化、历史渲染
//! - **orchestrator**: 回复编排（simple / deep_think / deep_research）
//! - **research**: 监督者 / 研究员委派协议与工具调用分片重组
//! - **retrieval**: 文档索引抽象与引用格式化
//! - **stream**: 有序分块流协议与发送端
//! - **tools**: 工具注册表、执行器与内置工具

pub mod config;
pub mod core;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod research;
pub mod retrieval;
pub mod stream;
pub mod tools;

pub use orchestrator::{ReplyHandle, ReplyOrchestrator, ReplyRequest};
