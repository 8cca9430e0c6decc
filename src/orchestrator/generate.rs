//! 最终回答生成
//!
//! 先发一个空的 response 开场分块，再把历史、引用与工具输出拼成上下文调用回答模型；
//! 推理分片转为 think 分块（仅推理模型），正文转为 response 分块。

use crate::core::ReplyError;
use crate::llm::{ChatModel, GenerateOptions, Message};
use crate::orchestrator::AssistantConfig;
use crate::stream::{ChunkType, ReplyStream};

/// 引用上下文的最大字符数
pub const REFERENCES_LIMIT: usize = 8192;

/// 回答上下文的三个来源，空的部分不出现在提示中
#[derive(Debug, Clone, Default)]
pub struct AnswerContext {
    pub history: String,
    pub references: String,
    pub tools_output: String,
}

impl AnswerContext {
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.history.is_empty() {
            out.push_str(&format!("\nConversation:\n{}\n", self.history));
        }
        if !self.references.is_empty() {
            let section = format!("\nReferences:\n{}\n", self.references);
            out.extend(section.chars().take(REFERENCES_LIMIT));
        }
        if !self.tools_output.is_empty() {
            out.push_str(&format!("\nTools Output:\n{}\n", self.tools_output));
        }
        out
    }
}

fn answer_prompt(query: &str, context: &str) -> String {
    if context.is_empty() {
        return query.to_string();
    }
    format!(
        r#"请结合以下上下文回答用户的问题。上下文不足以回答时如实说明，不要编造；引用资料时注明来源标题。

上下文：
{context}

问题：
{query}"#,
        context = context,
        query = query,
    )
}

/// 流式生成最终回答，返回完整正文
pub async fn generate_answer(
    stream: &ReplyStream,
    model: &dyn ChatModel,
    config: &AssistantConfig,
    query: &str,
    context: &AnswerContext,
) -> Result<String, ReplyError> {
    stream.send(ChunkType::Response, "").await?;

    let mut messages = Vec::new();
    if !config.role_prompt.is_empty() {
        messages.push(Message::system(config.role_prompt.as_str()));
    }
    messages.push(Message::user(answer_prompt(query, &context.render())));

    let options = GenerateOptions::default()
        .with_temperature(config.model.temperature)
        .with_max_tokens(config.model.max_tokens);
    let reasoning = config.model.reasoning.then_some(ChunkType::Think);

    let response = stream
        .relay(model, &messages, &options, ChunkType::Response, reasoning)
        .await?;
    if response.text.is_empty() {
        tracing::warn!(query, "model returned an empty answer");
    }
    Ok(response.text)
}
