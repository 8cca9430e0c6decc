//! 意图分析（deep_think）
//!
//! 模型输出以 query_intent 分块实时转发；结束后从 ```json 代码块或 `<JSON>` 标签中取出 JSON 解析为 [`QueryIntent`]。
//! 解析失败不中断回复，只是后续步骤不做门控。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::ReplyError;
use crate::llm::{ChatModel, GenerateOptions, Message};
use crate::memory::{ChatMessage, ProcessingDetail};
use crate::orchestrator::AssistantConfig;
use crate::stream::{ChunkType, ReplyStream};

/// 意图分析结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryIntent {
    pub category: String,
    pub intent: String,
    pub query: Vec<String>,
    pub keyword: Vec<String>,
    pub suggestion: Vec<String>,
    pub need_plan_tasks: bool,
    pub need_call_tools: bool,
    pub need_network_search: bool,
}

impl QueryIntent {
    /// 检索时追加的词项：改写后的查询 + 关键词
    pub fn search_terms(&self) -> Vec<String> {
        self.keyword.iter().chain(self.query.iter()).cloned().collect()
    }
}

fn markdown_json() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)`{3,}json(.+)`{3,}").ok()).as_ref()
}

fn tagged_json() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<JSON>(.+)</JSON>").ok()).as_ref()
}

/// 取出 ```json 代码块或 <JSON> 标签内的文本（前者优先）
pub fn extract_json(text: &str) -> Option<&str> {
    [markdown_json(), tagged_json()]
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str().trim())
}

pub fn parse_intent(text: &str) -> Result<QueryIntent, String> {
    let json = extract_json(text).ok_or_else(|| "no JSON block in intent output".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

fn intent_prompt(query: &str, history: &str) -> String {
    format!(
        r#"你是查询意图分析器。根据对话历史与用户问题，判断用户意图，并决定回答前是否需要调用工具、是否需要检索资料。

对话历史：
{history}

用户问题：
{query}

只输出一个 JSON 对象，放在 <JSON></JSON> 标签内，字段如下：
- category: 问题类别
- intent: 一句话描述用户意图
- query: 改写后的检索查询（数组）
- keyword: 关键词（数组）
- suggestion: 可以追问的问题（数组）
- need_plan_tasks: 是否需要拆分为多步任务
- need_call_tools: 是否需要调用工具
- need_network_search: 是否需要检索资料"#,
        history = if history.is_empty() { "</empty>" } else { history },
        query = query,
    )
}

/// 分析意图并记录 Order 10 的步骤详情；解析失败返回 Ok(None)
pub async fn analyze_intent(
    stream: &ReplyStream,
    model: &dyn ChatModel,
    config: &AssistantConfig,
    query: &str,
    history: &str,
    reply: &mut ChatMessage,
) -> Result<Option<QueryIntent>, ReplyError> {
    let options = GenerateOptions::default()
        .with_temperature(config.model.temperature)
        .with_max_tokens(config.model.max_tokens);
    let response = stream
        .relay(
            model,
            &[Message::user(intent_prompt(query, history))],
            &options,
            ChunkType::QueryIntent,
            None,
        )
        .await?;

    match parse_intent(&response.text) {
        Ok(intent) => {
            tracing::debug!(
                category = %intent.category,
                need_call_tools = intent.need_call_tools,
                need_network_search = intent.need_network_search,
                "query intent parsed"
            );
            let payload = serde_json::to_value(&intent).unwrap_or_default();
            reply.push_detail(ProcessingDetail::with_payload(
                ProcessingDetail::INTENT,
                ChunkType::QueryIntent,
                payload,
            ));
            Ok(Some(intent))
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse query intent");
            Ok(None)
        }
    }
}
