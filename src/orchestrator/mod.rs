//! 回复编排
//!
//! 一条用户消息恰好产生一条助手回复与一个 reply_end 分块。按助手配置的模式分派：
//! - simple：可选工具调用 → 可选单次检索 → 生成
//! - deep_think：意图分析 → 按意图门控的工具调用 / 两阶段检索 → 生成
//! - deep_research：主管 / 研究员委派，流式输出长篇报告
//!
//! 检索与工具调用的失败只记日志并降级；意图分析与生成的模型错误、取消与发送失败则终止流水线；收尾总会执行。

pub mod assistant;
pub mod finalizer;
pub mod generate;
pub mod intent;
mod modes;
pub mod reply;
pub mod retrieval;
pub mod tool_calling;

pub use assistant::{
    AssistantConfig, DatasourceSettings, DeepThinkSettings, HistorySettings, ModelSettings, ReplyMode, ToolSettings,
};
pub use finalizer::{error_text, Outcome, ReplyFinalizer};
pub use generate::{generate_answer, AnswerContext, REFERENCES_LIMIT};
pub use intent::{analyze_intent, extract_json, parse_intent, QueryIntent};
pub(crate) use reply::Services;
pub use reply::{ReplyHandle, ReplyOrchestrator, ReplyRequest};
pub use retrieval::{run_retrieval, PickedDocument};
pub use tool_calling::run_tool_loop;

use crate::core::ReplyError;

/// 检索、工具调用等可降级步骤的结果：失败时记录日志并返回 None，取消与发送失败原样向上传播
pub(crate) fn recover_step<T>(step: &str, result: Result<T, ReplyError>) -> Result<Option<T>, ReplyError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.aborts_pipeline() => Err(e),
        Err(e) => {
            tracing::warn!(step, error = %e, "step failed, continuing without it");
            Ok(None)
        }
    }
}
