//! 深度研究顶层流程：init_research → supervisor → final_report
//!
//! 最终报告按分片流式写出（推理为 think，正文为 response），结束后去掉包裹报告的 Markdown 代码块标记。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::ReplyError;
use crate::graph::{CompiledGraph, GraphError, GraphState, Node, StateGraph, StateKey, StateUpdate, END};
use crate::llm::{GenerateOptions, Message, Role};
use crate::research::{build_researcher_graph, build_supervisor_graph, prompts, ResearchContext};
use crate::stream::{ChunkType, ReplyStream};

pub const INIT_RESEARCH: &str = "init_research";
pub const SUPERVISOR_STEP: &str = "supervisor";
pub const FINAL_REPORT: &str = "final_report";

/// 研究结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResearchReport {
    pub report: String,
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    pub iterations: u32,
}

struct InitResearchNode;

#[async_trait]
impl Node for InitResearchNode {
    async fn run(&self, _token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        let query = state
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .unwrap_or_default();
        if query.is_empty() {
            return Err(ReplyError::Config("could not extract the research query".to_string()).into());
        }
        let brief = prompts::research_brief(query);
        tracing::debug!(brief = %brief, "research brief created");
        Ok(StateUpdate::new().brief(brief).iterations(0))
    }
}

struct SupervisorStepNode {
    supervisor: CompiledGraph,
}

#[async_trait]
impl Node for SupervisorStepNode {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        let sub = GraphState::new().with_brief(state.brief.clone());
        let done = self.supervisor.invoke(token, sub).await?;
        Ok(StateUpdate::new()
            .notes(done.notes)
            .raw_notes(done.raw_notes)
            .iterations(done.iterations))
    }
}

struct FinalReportNode {
    ctx: ResearchContext,
    stream: Arc<ReplyStream>,
}

#[async_trait]
impl Node for FinalReportNode {
    async fn run(&self, _token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        if state.notes.is_empty() {
            self.stream.send(ChunkType::Response, prompts::NO_FINDINGS).await?;
            return Ok(StateUpdate::new()
                .output(prompts::NO_FINDINGS)
                .message(Message::assistant(prompts::NO_FINDINGS)));
        }

        let prompt = prompts::final_report(&state.brief, &conversation_text(&state.messages), &state.notes.join("\n\n"));
        tracing::info!(findings = state.notes.len(), "generating final report");
        let response = self
            .stream
            .relay(
                self.ctx.model.as_ref(),
                &[Message::user(prompt)],
                &GenerateOptions::default(),
                ChunkType::Response,
                Some(ChunkType::Think),
            )
            .await?;

        let report = strip_code_fences(&response.text);
        Ok(StateUpdate::new()
            .output(report.clone())
            .message(Message::assistant(report)))
    }
}

fn conversation_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "human",
                Role::Assistant => "ai",
                Role::Tool => "tool",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 去掉包裹整篇报告的 ``` / ```markdown 标记
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```markdown")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

/// 一次深度研究：编译好的顶层图绑定到当前回复的输出流
pub struct DeepResearch {
    graph: CompiledGraph,
    stream: Arc<ReplyStream>,
}

impl DeepResearch {
    pub fn new(ctx: ResearchContext, stream: Arc<ReplyStream>) -> Result<Self, GraphError> {
        let researcher = build_researcher_graph(&ctx)?;
        let supervisor = build_supervisor_graph(&ctx, researcher)?;
        let graph = StateGraph::new("deep_research")
            .add_node(INIT_RESEARCH, InitResearchNode)
            .add_node(SUPERVISOR_STEP, SupervisorStepNode { supervisor })
            .add_node(
                FINAL_REPORT,
                FinalReportNode {
                    ctx,
                    stream: Arc::clone(&stream),
                },
            )
            .set_entry_point(INIT_RESEARCH)
            .add_edge(INIT_RESEARCH, SUPERVISOR_STEP)
            .add_edge(SUPERVISOR_STEP, FINAL_REPORT)
            .add_edge(FINAL_REPORT, END)
            .append(StateKey::Messages)
            .append(StateKey::Notes)
            .append(StateKey::RawNotes)
            .compile()?;
        Ok(Self { graph, stream })
    }

    pub async fn run(&self, query: &str) -> Result<ResearchReport, ReplyError> {
        let state = GraphState::new().with_messages(vec![Message::user(query)]);
        let done = self.graph.invoke(self.stream.token(), state).await?;
        tracing::info!(
            iterations = done.iterations,
            findings = done.notes.len(),
            raw_results = done.raw_notes.len(),
            report_len = done.output.len(),
            "research complete"
        );
        Ok(ResearchReport {
            report: done.output,
            notes: done.notes,
            raw_notes: done.raw_notes,
            iterations: done.iterations,
        })
    }
}
