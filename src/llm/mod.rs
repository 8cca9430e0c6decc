//! 模型层：调用抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use mock::{ScriptedModel, ScriptedTurn};
pub use openai::OpenAiChatModel;
pub use traits::{generate_collect, next_fragment, open_stream, ChatModel, FragmentStream, LlmError};
pub use types::{
    GenerateOptions, Message, ModelFragment, ModelResponse, Role, ToolCall, ToolCallFragment, ToolDefinition,
};

use std::sync::Arc;

use crate::config::LlmSection;

/// 按配置创建模型：provider = "mock" 时返回脚本化模型，其余走 OpenAI 兼容端点
pub fn create_model(cfg: &LlmSection) -> Arc<dyn ChatModel> {
    match cfg.provider.as_str() {
        "mock" => Arc::new(ScriptedModel::new()),
        _ => Arc::new(OpenAiChatModel::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            cfg.api_key.as_deref(),
        )),
    }
}
