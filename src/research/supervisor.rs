//! 主管图
//!
//! supervisor（规划）→ supervisor_tools（执行委派）→ supervisor …，
//! 出现 research_complete 或没有工具调用时结束。
//!
//! 委派：单轮最多 max_concurrent_research_units 个研究主题被接受，超出部分立即以超额错误答复；
//! 被接受的主题各自以独立状态并发运行研究员图，全部返回后按完成顺序把结果追加进 notes / raw_notes。

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::{panic_message, TaskScheduler};
use crate::graph::{CompiledGraph, GraphError, GraphState, Node, StateGraph, StateKey, StateUpdate, END};
use crate::llm::{generate_collect, GenerateOptions, Message, ToolCall, ToolDefinition};
use crate::research::{prompts, reconstruct_tool_calls, run_researcher, ResearchContext, ResearchOutcome};
use crate::tools::schema::{parameters_schema, ConductResearchArgs, ResearchCompleteArgs, ThinkArgs};
use crate::tools::{definition_of, ThinkTool, THINK_TOOL};

pub const SUPERVISOR: &str = "supervisor";
pub const SUPERVISOR_TOOLS: &str = "supervisor_tools";

pub const CONDUCT_RESEARCH: &str = "conduct_research";
pub const RESEARCH_COMPLETE: &str = "research_complete";

fn supervisor_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: CONDUCT_RESEARCH.to_string(),
            description: "把一个研究主题委派给专门的研究员。主题需要完整、独立、描述详细。".to_string(),
            parameters: parameters_schema::<ConductResearchArgs>(),
        },
        ToolDefinition {
            name: RESEARCH_COMPLETE.to_string(),
            description: "研究已经充分、可以撰写报告时调用。".to_string(),
            parameters: parameters_schema::<ResearchCompleteArgs>(),
        },
        definition_of(&ThinkTool),
    ]
}

fn over_capacity(max: usize) -> String {
    format!(
        "Error: exceeded the maximum number of concurrent research units ({}). Delegate fewer topics at once.",
        max
    )
}

struct SupervisorNode {
    ctx: ResearchContext,
}

#[async_trait]
impl Node for SupervisorNode {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        let cfg = &self.ctx.config;
        if state.iterations >= cfg.max_researcher_iterations {
            tracing::info!(cap = cfg.max_researcher_iterations, "supervisor reached iteration limit, completing research");
            let complete = ToolCall::new("complete_1", RESEARCH_COMPLETE, r#"{"complete": true}"#);
            return Ok(StateUpdate::new().message(Message::assistant_with_tools("", vec![complete])));
        }

        let mut new_messages = Vec::new();
        if state.messages.is_empty() {
            new_messages.push(Message::user(prompts::supervisor_kickoff(&state.brief)));
        }
        let mut messages = vec![Message::system(prompts::supervisor_system(
            cfg.max_researcher_iterations,
            cfg.max_concurrent_research_units,
        ))];
        messages.extend(state.messages.iter().cloned());
        messages.extend(new_messages.iter().cloned());

        let options = GenerateOptions::default().with_tools(supervisor_tool_definitions());
        let response = generate_collect(self.ctx.model.as_ref(), &messages, &options, token).await?;
        let calls = reconstruct_tool_calls(&response.tool_fragments);
        tracing::info!(iteration = state.iterations + 1, calls = calls.len(), "supervisor turn");

        new_messages.push(Message::assistant_with_tools(response.text, calls));
        Ok(StateUpdate::new()
            .messages(new_messages)
            .iterations(state.iterations + 1))
    }
}

struct SupervisorToolsNode {
    ctx: ResearchContext,
    researcher: CompiledGraph,
}

#[async_trait]
impl Node for SupervisorToolsNode {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        let Some(last) = state.last_message() else {
            return Ok(StateUpdate::new());
        };
        let max = self.ctx.config.max_concurrent_research_units.max(1);
        let mut tool_messages = Vec::new();
        let mut delegations = Vec::new();

        for call in &last.tool_calls {
            match call.name.as_str() {
                CONDUCT_RESEARCH => delegations.push(call.clone()),
                THINK_TOOL => {
                    let result = match call.parse_arguments::<ThinkArgs>() {
                        Ok(args) => ThinkTool::record(&args.reflection),
                        Err(e) => format!("Invalid arguments: {}", e),
                    };
                    tool_messages.push(Message::tool(&call.id, &call.name, result));
                }
                RESEARCH_COMPLETE => {}
                other => tool_messages.push(Message::tool(&call.id, other, format!("Unknown tool: {}", other))),
            }
        }

        if delegations.len() > max {
            tracing::debug!(requested = delegations.len(), max, "limiting research delegations");
            for call in delegations.split_off(max) {
                tool_messages.push(Message::tool(&call.id, &call.name, over_capacity(max)));
            }
        }

        let mut running = JoinSet::new();
        for call in delegations {
            let graph = self.researcher.clone();
            let scheduler = self.ctx.scheduler.clone();
            let token = token.clone();
            running.spawn(async move {
                let outcome = AssertUnwindSafe(delegate(&graph, &scheduler, &call, &token))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(GraphError::node(format!("researcher panicked: {}", panic_message(panic.as_ref()))))
                    });
                (call, outcome)
            });
        }

        let mut notes = Vec::new();
        let mut raw_notes = Vec::new();
        let mut cancelled = false;
        // 取消时不放弃已派出的研究员，等待它们各自观察到取消后返回
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((call, Ok(outcome))) => {
                    tool_messages.push(Message::tool(&call.id, CONDUCT_RESEARCH, outcome.summary.clone()));
                    notes.push(outcome.summary);
                    raw_notes.extend(outcome.raw_notes);
                }
                Ok((_, Err(GraphError::Cancelled))) => cancelled = true,
                Ok((call, Err(e))) => {
                    tracing::warn!(call_id = %call.id, error = %e, "research unit failed");
                    tool_messages.push(Message::tool(&call.id, CONDUCT_RESEARCH, format!("Research error: {}", e)));
                }
                Err(e) => tracing::error!(error = %e, "research task aborted"),
            }
        }
        if cancelled || token.is_cancelled() {
            return Err(GraphError::Cancelled);
        }

        Ok(StateUpdate::new()
            .messages(tool_messages)
            .notes(notes)
            .raw_notes(raw_notes))
    }
}

async fn delegate(
    graph: &CompiledGraph,
    scheduler: &TaskScheduler,
    call: &ToolCall,
    token: &CancellationToken,
) -> Result<ResearchOutcome, GraphError> {
    let args: ConductResearchArgs = call
        .parse_arguments()
        .map_err(|e| GraphError::node(format!("invalid arguments: {}", e)))?;
    let _permit = scheduler.acquire_research(token).await.ok_or(GraphError::Cancelled)?;
    tracing::info!(call_id = %call.id, topic = %args.research_topic, "research unit started");
    run_researcher(graph, &args.research_topic, token).await
}

pub fn build_supervisor_graph(ctx: &ResearchContext, researcher: CompiledGraph) -> Result<CompiledGraph, GraphError> {
    StateGraph::new("supervisor")
        .add_node(SUPERVISOR, SupervisorNode { ctx: ctx.clone() })
        .add_node(
            SUPERVISOR_TOOLS,
            SupervisorToolsNode {
                ctx: ctx.clone(),
                researcher,
            },
        )
        .set_entry_point(SUPERVISOR)
        .add_conditional_edges(SUPERVISOR, &[SUPERVISOR_TOOLS, END], |state| {
            let next = match state.last_message() {
                Some(m) if m.calls_tool(RESEARCH_COMPLETE) => END,
                Some(m) if m.has_tool_calls() => SUPERVISOR_TOOLS,
                _ => END,
            };
            next.to_string()
        })
        .add_edge(SUPERVISOR_TOOLS, SUPERVISOR)
        .append(StateKey::Messages)
        .append(StateKey::Notes)
        .append(StateKey::RawNotes)
        .compile()
}
