//! 研究员图
//!
//! researcher（调用模型）⇄ researcher_tools（执行工具），没有待执行调用时进入 compress_research。
//! 工具调用轮数达到上限后合成一条结束消息，直接进入压缩。

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::graph::{CompiledGraph, GraphError, GraphState, Node, StateGraph, StateKey, StateUpdate, END};
use crate::llm::{generate_collect, GenerateOptions, Message};
use crate::research::{prompts, reconstruct_tool_calls, ResearchContext};
use crate::tools::{ThinkTool, ToolError, THINK_TOOL};

pub const RESEARCHER: &str = "researcher";
pub const RESEARCHER_TOOLS: &str = "researcher_tools";
pub const COMPRESS_RESEARCH: &str = "compress_research";

/// 一次研究员调用的产出
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResearchOutcome {
    pub summary: String,
    pub raw_notes: Vec<String>,
}

struct ResearcherNode {
    ctx: ResearchContext,
}

#[async_trait]
impl Node for ResearcherNode {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        let cap = self.ctx.config.max_tool_call_iterations;
        if state.iterations >= cap {
            tracing::info!(topic = %state.brief, cap, "researcher reached tool call limit");
            return Ok(StateUpdate::new().message(Message::assistant(prompts::RESEARCHER_CAP_REACHED)));
        }

        let mut messages = vec![Message::system(prompts::researcher_system(
            cap,
            &self.ctx.search_tools(),
        ))];
        messages.extend(state.messages.iter().cloned());
        let options = GenerateOptions::default().with_tools(self.ctx.researcher_tool_definitions());

        let response = generate_collect(self.ctx.model.as_ref(), &messages, &options, token).await?;
        let calls = reconstruct_tool_calls(&response.tool_fragments);
        tracing::debug!(topic = %state.brief, iteration = state.iterations + 1, calls = calls.len(), "researcher turn");

        Ok(StateUpdate::new()
            .message(Message::assistant_with_tools(response.text, calls))
            .iterations(state.iterations + 1))
    }
}

struct ResearcherToolsNode {
    ctx: ResearchContext,
}

#[async_trait]
impl Node for ResearcherToolsNode {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        let Some(last) = state.last_message() else {
            return Ok(StateUpdate::new());
        };
        let search_tools = self.ctx.search_tools();
        let mut tool_messages = Vec::new();
        let mut raw_notes = Vec::new();

        for call in &last.tool_calls {
            if token.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            let args: Value = match serde_json::from_str(&call.arguments) {
                Ok(args) => args,
                Err(e) => {
                    tracing::info!(tool = %call.name, error = %e, "skipping tool call with unparseable arguments");
                    continue;
                }
            };

            let result = if call.name == THINK_TOOL {
                ThinkTool::record(args["reflection"].as_str().unwrap_or_default())
            } else if search_tools.contains(&call.name) {
                match self.ctx.tools.execute(&call.name, args, token).await {
                    Ok(found) => {
                        raw_notes.push(found.clone());
                        found
                    }
                    Err(ToolError::Cancelled) => return Err(GraphError::Cancelled),
                    Err(e) => format!("Search error: {}", e),
                }
            } else {
                format!("Unknown tool: {}", call.name)
            };
            tool_messages.push(Message::tool(&call.id, &call.name, result));
        }

        Ok(StateUpdate::new().messages(tool_messages).raw_notes(raw_notes))
    }
}

struct CompressNode {
    ctx: ResearchContext,
}

#[async_trait]
impl Node for CompressNode {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        if state.raw_notes.is_empty() {
            return Ok(StateUpdate::new().output(prompts::NOTHING_TO_COMPRESS));
        }
        let prompt = prompts::compression(&state.brief, &state.raw_notes.join("\n\n"));
        let options = GenerateOptions::default().with_max_tokens(self.ctx.config.compression_max_tokens);
        let response = generate_collect(self.ctx.model.as_ref(), &[Message::user(prompt)], &options, token).await?;
        tracing::debug!(topic = %state.brief, len = response.text.len(), "research compressed");
        Ok(StateUpdate::new().output(response.text))
    }
}

pub fn build_researcher_graph(ctx: &ResearchContext) -> Result<CompiledGraph, GraphError> {
    StateGraph::new("researcher")
        .add_node(RESEARCHER, ResearcherNode { ctx: ctx.clone() })
        .add_node(RESEARCHER_TOOLS, ResearcherToolsNode { ctx: ctx.clone() })
        .add_node(COMPRESS_RESEARCH, CompressNode { ctx: ctx.clone() })
        .set_entry_point(RESEARCHER)
        .add_conditional_edges(RESEARCHER, &[RESEARCHER_TOOLS, COMPRESS_RESEARCH], |state| {
            let pending = state.last_message().map(|m| m.has_tool_calls()).unwrap_or(false);
            let next = if pending { RESEARCHER_TOOLS } else { COMPRESS_RESEARCH };
            next.to_string()
        })
        .add_edge(RESEARCHER_TOOLS, RESEARCHER)
        .add_edge(COMPRESS_RESEARCH, END)
        .append(StateKey::Messages)
        .append(StateKey::RawNotes)
        .compile()
}

/// 以独立状态运行一次研究员图
pub async fn run_researcher(
    graph: &CompiledGraph,
    topic: &str,
    token: &CancellationToken,
) -> Result<ResearchOutcome, GraphError> {
    let state = GraphState::new()
        .with_messages(vec![Message::user(topic)])
        .with_brief(topic);
    let done = graph.invoke(token, state).await?;
    Ok(ResearchOutcome {
        summary: done.output,
        raw_notes: done.raw_notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::TaskScheduler;
    use crate::llm::{Role, ScriptedModel, ScriptedTurn, ToolCall};
    use crate::research::ResearchConfig;
    use crate::retrieval::{Document, InMemoryIndex};
    use crate::tools::{EnterpriseSearchTool, ToolExecutor, ToolRegistry};

    fn context(model: ScriptedModel, config: ResearchConfig) -> (ResearchContext, Arc<ScriptedModel>) {
        let mut registry = ToolRegistry::new();
        registry.register(EnterpriseSearchTool::new(Arc::new(InMemoryIndex::new(vec![Document::new(
            "d1",
            "Raft consensus",
            "leader election and log replication",
        )]))));
        let model = Arc::new(model);
        let ctx = ResearchContext::new(
            model.clone(),
            ToolExecutor::new(registry, 5),
            TaskScheduler::new(2),
            config,
        );
        (ctx, model)
    }

    #[tokio::test]
    async fn test_search_then_compress() {
        let model = ScriptedModel::new()
            .then_tool_calls(vec![
                ToolCall::new("t1", "enterprise_search", r#"{"query":"raft"}"#),
                ToolCall::new("t2", "think_tool", r#"{"reflection":"found it"}"#),
                ToolCall::new("t3", "mystery", "{}"),
                ToolCall::new("t4", "enterprise_search", "{broken"),
            ])
            .then_text("enough")
            .then_text("raft summary");
        let (ctx, model) = context(model, ResearchConfig::default());
        let graph = build_researcher_graph(&ctx).unwrap();

        let outcome = run_researcher(&graph, "raft", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.summary, "raft summary");
        assert_eq!(outcome.raw_notes.len(), 1);
        assert!(outcome.raw_notes[0].contains("Raft consensus"));

        // 第二次调用看到三条工具结果（参数无法解析的调用被跳过）
        let second = &model.requests()[1];
        let tool_results: Vec<&Message> = second.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_results.len(), 3);
        assert_eq!(tool_results[1].content, "Reflection recorded: found it");
        assert_eq!(tool_results[2].content, "Unknown tool: mystery");
    }

    #[tokio::test]
    async fn test_cap_forces_compression() {
        let model = ScriptedModel::from_fn(|messages, _| {
            let is_compression = messages.len() == 1 && messages[0].role == Role::User;
            if is_compression {
                ScriptedTurn::text("capped summary")
            } else {
                ScriptedTurn::tool_calls(vec![ToolCall::new("t", "enterprise_search", r#"{"query":"raft"}"#)])
            }
        });
        let config = ResearchConfig {
            max_tool_call_iterations: 2,
            ..ResearchConfig::default()
        };
        let (ctx, model) = context(model, config);
        let graph = build_researcher_graph(&ctx).unwrap();

        let outcome = run_researcher(&graph, "raft", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.summary, "capped summary");
        assert_eq!(outcome.raw_notes.len(), 2);
        // 两轮研究 + 一次压缩
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_no_findings_skips_model() {
        let (ctx, model) = context(ScriptedModel::new().then_text("nothing to search"), ResearchConfig::default());
        let graph = build_researcher_graph(&ctx).unwrap();
        let outcome = run_researcher(&graph, "topic", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.summary, prompts::NOTHING_TO_COMPRESS);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_researcher() {
        let (ctx, _) = context(ScriptedModel::new(), ResearchConfig::default());
        let graph = build_researcher_graph(&ctx).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            run_researcher(&graph, "topic", &token).await,
            Err(GraphError::Cancelled)
        ));
    }
}
