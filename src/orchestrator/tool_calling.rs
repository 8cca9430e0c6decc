//! 工具调用循环（simple / deep_think）
//!
//! 模型回合 → 重组工具调用 → 经执行器执行 → 结果作为 tool 消息回灌，直到模型不再调用工具或达到轮数上限。
//! 模型文本与每次调用的进度都以 tools 分块转发；返回值作为最终回答的 Tools Output 上下文。

use crate::core::ReplyError;
use crate::llm::{ChatModel, GenerateOptions, Message};
use crate::orchestrator::AssistantConfig;
use crate::research::reconstruct_tool_calls;
use crate::stream::{ChunkType, ReplyStream};
use crate::tools::{ToolError, ToolExecutor};

fn tool_system_prompt(role_prompt: &str) -> String {
    let mut prompt = String::new();
    if !role_prompt.is_empty() {
        prompt.push_str(role_prompt);
        prompt.push_str("\n\n");
    }
    prompt.push_str("回答前可以调用提供的工具获取信息。信息足够时直接给出结论，不要再调用工具。");
    prompt
}

/// 运行工具循环；没有可用工具时直接返回空串
pub async fn run_tool_loop(
    stream: &ReplyStream,
    model: &dyn ChatModel,
    tools: &ToolExecutor,
    config: &AssistantConfig,
    history: &str,
    query: &str,
) -> Result<String, ReplyError> {
    let definitions = tools.registry().definitions();
    if definitions.is_empty() {
        tracing::debug!("no tools registered, skipping tool calling");
        return Ok(String::new());
    }

    let mut messages = vec![Message::system(tool_system_prompt(&config.role_prompt))];
    if !history.is_empty() {
        messages.push(Message::system(history));
    }
    messages.push(Message::user(query));
    let options = GenerateOptions::default()
        .with_temperature(config.model.temperature)
        .with_max_tokens(config.model.max_tokens)
        .with_tools(definitions);

    let mut results: Vec<String> = Vec::new();
    let mut answer = String::new();
    let cap = config.tools.max_iterations;
    let mut round = 0;
    let mut finished = false;

    while round < cap {
        round += 1;
        let response = stream
            .relay(model, &messages, &options, ChunkType::Tools, None)
            .await?;
        let calls = reconstruct_tool_calls(&response.tool_fragments);
        if calls.is_empty() {
            answer = response.text;
            finished = true;
            break;
        }
        tracing::debug!(round, calls = calls.len(), "tool calling round");

        messages.push(Message::assistant_with_tools(response.text, calls.clone()));
        for call in &calls {
            stream
                .send(ChunkType::Tools, format!("\nCalling tool `{}`: {}\n", call.name, call.arguments))
                .await?;
            let result = match tools.call(&call.name, &call.arguments, stream.token()).await {
                Ok(output) => output,
                Err(ToolError::Cancelled) => return Err(ReplyError::Cancelled),
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                    format!("Error: {}", e)
                }
            };
            stream
                .send(ChunkType::Tools, format!("Tool `{}` returned {} chars\n", call.name, result.chars().count()))
                .await?;
            results.push(format!("[{}] {}", call.name, result));
            messages.push(Message::tool(&call.id, &call.name, result));
        }
    }

    if !finished {
        tracing::info!(cap, "tool calling reached iteration limit");
    }

    if answer.trim().is_empty() {
        Ok(results.join("\n\n"))
    } else {
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    use crate::llm::{Role, ScriptedModel, ToolCall};
    use crate::memory::ChatMessage;
    use crate::stream::RecordingChunkSender;
    use crate::tools::{Tool, ToolRegistry};

    struct Calculator;

    #[async_trait]
    impl Tool for Calculator {
        fn name(&self) -> &str {
            "calculator"
        }

        fn description(&self) -> &str {
            "adds a and b"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            let a = args["a"].as_i64().ok_or("missing a")?;
            let b = args["b"].as_i64().ok_or("missing b")?;
            Ok((a + b).to_string())
        }
    }

    fn setup() -> (ReplyStream, Arc<RecordingChunkSender>, ToolExecutor) {
        let sender = Arc::new(RecordingChunkSender::new());
        let request = ChatMessage::user("s1", "q");
        let reply = ChatMessage::reply_to(&request, None);
        let stream = ReplyStream::new(sender.clone(), &reply, CancellationToken::new());
        let mut registry = ToolRegistry::new();
        registry.register(Calculator);
        (stream, sender, ToolExecutor::new(registry, 5))
    }

    #[tokio::test]
    async fn test_calls_then_answers() {
        let (stream, sender, tools) = setup();
        let model = ScriptedModel::new()
            .then_tool_calls(vec![ToolCall::new("c1", "calculator", r#"{"a":2,"b":2}"#)])
            .then_text("the sum is 4");

        let out = run_tool_loop(&stream, &model, &tools, &AssistantConfig::default(), "", "2+2?")
            .await
            .unwrap();
        assert_eq!(out, "the sum is 4");
        assert!(sender.text_of(ChunkType::Tools).contains("Calling tool `calculator`"));
        let second = &model.requests()[1];
        let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.content, "4");
    }

    #[tokio::test]
    async fn test_cap_returns_collected_results() {
        let (stream, _, tools) = setup();
        let model = ScriptedModel::from_fn(|_, _| {
            crate::llm::ScriptedTurn::tool_calls(vec![ToolCall::new("c", "calculator", r#"{"a":1,"b":1}"#)])
        });
        let mut config = AssistantConfig::default();
        config.tools.max_iterations = 2;

        let out = run_tool_loop(&stream, &model, &tools, &config, "", "q").await.unwrap();
        assert_eq!(model.call_count(), 2);
        assert_eq!(out, "[calculator] 2\n\n[calculator] 2");
    }

    #[tokio::test]
    async fn test_failed_tool_is_reported_to_model() {
        let (stream, _, tools) = setup();
        let model = ScriptedModel::new()
            .then_tool_calls(vec![ToolCall::new("c1", "calculator", r#"{"a":1}"#)])
            .then_text("could not add");
        let out = run_tool_loop(&stream, &model, &tools, &AssistantConfig::default(), "", "q")
            .await
            .unwrap();
        assert_eq!(out, "could not add");
        let tool_msg = model.requests()[1].iter().find(|m| m.role == Role::Tool).cloned().unwrap();
        assert!(tool_msg.content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_no_tools_skips_model() {
        let sender = Arc::new(RecordingChunkSender::new());
        let request = ChatMessage::user("s1", "q");
        let stream = ReplyStream::new(sender, &ChatMessage::reply_to(&request, None), CancellationToken::new());
        let model = ScriptedModel::new();
        let tools = ToolExecutor::new(ToolRegistry::new(), 5);
        let out = run_tool_loop(&stream, &model, &tools, &AssistantConfig::default(), "", "q")
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(model.call_count(), 0);
    }
}
