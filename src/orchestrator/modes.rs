//! 三种回复模式的流水线
//!
//! simple 与 deep_think 都是顺序执行：工具 → 检索 → 生成，任一步骤一次只有一个挂起点；
//! deep_research 把整段工作交给主管 / 研究员委派流程。

use std::sync::Arc;

use serde_json::json;

use crate::core::ReplyError;
use crate::memory::{ChatMessage, ProcessingDetail};
use crate::orchestrator::{
    analyze_intent, generate_answer, recover_step, run_retrieval, run_tool_loop, AnswerContext, AssistantConfig,
    QueryIntent, ReplyMode, Services,
};
use crate::research::{DeepResearch, ResearchContext};
use crate::stream::{ChunkType, ReplyStream};

/// 单条回复流水线的输入
pub(crate) struct Pipeline<'a> {
    pub services: &'a Services,
    pub config: &'a AssistantConfig,
    pub stream: &'a Arc<ReplyStream>,
    pub query: &'a str,
    pub history: String,
}

impl Pipeline<'_> {
    pub async fn run(&self, reply: &mut ChatMessage) -> Result<(), ReplyError> {
        tracing::debug!(mode = ?self.config.mode, "dispatching reply");
        match self.config.mode {
            ReplyMode::Simple => self.simple(reply).await,
            ReplyMode::DeepThink => self.deep_think(reply).await,
            ReplyMode::DeepResearch => self.deep_research(reply).await,
        }
    }

    async fn tools(&self) -> Result<String, ReplyError> {
        let output = run_tool_loop(
            self.stream,
            self.services.model.as_ref(),
            &self.services.tools,
            self.config,
            &self.history,
            self.query,
        )
        .await;
        Ok(recover_step("tool_calling", output)?.unwrap_or_default())
    }

    async fn retrieval(
        &self,
        intent: Option<&QueryIntent>,
        deep: bool,
        reply: &mut ChatMessage,
    ) -> Result<String, ReplyError> {
        let Some(index) = &self.services.index else {
            tracing::debug!("datasource enabled but no document index configured");
            return Ok(String::new());
        };
        let references = run_retrieval(
            self.stream,
            self.services.model.as_ref(),
            index.as_ref(),
            self.config,
            self.query,
            intent,
            deep,
            reply,
        )
        .await;
        Ok(recover_step("retrieval", references)?.unwrap_or_default())
    }

    async fn answer(&self, references: String, tools_output: String, reply: &mut ChatMessage) -> Result<(), ReplyError> {
        let context = AnswerContext {
            history: self.history.clone(),
            references,
            tools_output,
        };
        let text = generate_answer(
            self.stream,
            self.services.model.as_ref(),
            self.config,
            self.query,
            &context,
        )
        .await?;
        reply.push_detail(ProcessingDetail::described(
            ProcessingDetail::RESPONSE,
            ChunkType::Response,
            text.as_str(),
        ));
        reply.message = text;
        Ok(())
    }

    async fn simple(&self, reply: &mut ChatMessage) -> Result<(), ReplyError> {
        let tools_output = if self.config.tools.enabled {
            self.tools().await?
        } else {
            String::new()
        };
        let references = if self.config.datasource.is_active() {
            self.retrieval(None, false, reply).await?
        } else {
            String::new()
        };
        self.answer(references, tools_output, reply).await
    }

    async fn deep_think(&self, reply: &mut ChatMessage) -> Result<(), ReplyError> {
        let gates = &self.config.deep_think;
        // 意图分析的模型错误终止回复；只有输出无法解析时才按 None 继续
        let intent = analyze_intent(
            self.stream,
            self.services.model.as_ref(),
            self.config,
            self.query,
            &self.history,
            reply,
        )
        .await?;

        let wants_tools = !(gates.pick_tools && intent.as_ref().is_some_and(|i| !i.need_call_tools));
        let tools_output = if self.config.tools.enabled && wants_tools {
            self.tools().await?
        } else {
            if self.config.tools.enabled {
                tracing::info!("intent analysis decided to skip tool calling");
            }
            String::new()
        };

        let promised = gates.tools_promised_result_size > 0 && tools_output.len() > gates.tools_promised_result_size;
        let wants_docs = !(gates.pick_datasource && intent.as_ref().is_some_and(|i| !i.need_network_search));
        let references = if self.config.datasource.is_active() && wants_docs && !promised {
            self.retrieval(intent.as_ref(), true, reply).await?
        } else {
            if self.config.datasource.is_active() {
                tracing::info!(promised, wants_docs, "skipping document search");
            }
            String::new()
        };

        self.answer(references, tools_output, reply).await
    }

    async fn deep_research(&self, reply: &mut ChatMessage) -> Result<(), ReplyError> {
        let ctx = ResearchContext::new(
            Arc::clone(&self.services.model),
            self.services.tools.clone(),
            self.services.scheduler.clone(),
            self.config.deep_research.clone(),
        );
        let research = DeepResearch::new(ctx, Arc::clone(self.stream))?;
        let report = research.run(self.query).await?;

        reply.push_detail(ProcessingDetail::with_payload(
            ProcessingDetail::RESPONSE,
            ChunkType::Response,
            json!({
                "iterations": report.iterations,
                "findings": report.notes.len(),
                "raw_results": report.raw_notes.len(),
            }),
        ));
        reply.message = report.report;
        Ok(())
    }
}
