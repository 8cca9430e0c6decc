//! 深度研究：主管 / 研究员两级委派
//!
//! - researcher：单个主题的工具循环（搜索、反思）与结果压缩
//! - supervisor：规划与委派，受限并发地扇出研究员，按完成顺序归并笔记
//! - workflow：init_research → supervisor → final_report 顶层流程
//! - fragments：流式工具调用分片重组

pub mod fragments;
pub mod prompts;
pub mod researcher;
pub mod supervisor;
pub mod workflow;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::TaskScheduler;
use crate::llm::{ChatModel, ToolDefinition};
use crate::tools::{definition_of, ThinkTool, ToolExecutor, ENTERPRISE_SEARCH};

pub use fragments::reconstruct_tool_calls;
pub use researcher::{build_researcher_graph, run_researcher, ResearchOutcome};
pub use supervisor::{build_supervisor_graph, CONDUCT_RESEARCH, RESEARCH_COMPLETE};
pub use workflow::{strip_code_fences, DeepResearch, ResearchReport};

fn default_max_researcher_iterations() -> u32 {
    10
}

fn default_max_concurrent_research_units() -> usize {
    3
}

fn default_max_tool_call_iterations() -> u32 {
    20
}

fn default_compression_max_tokens() -> u32 {
    8192
}

/// 深度研究参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResearchConfig {
    /// 主管规划 / 委派轮数上限
    #[serde(default = "default_max_researcher_iterations")]
    pub max_researcher_iterations: u32,

    /// 单轮最多并行的研究员数
    #[serde(default = "default_max_concurrent_research_units")]
    pub max_concurrent_research_units: usize,

    /// 单个研究员的工具调用轮数上限
    #[serde(default = "default_max_tool_call_iterations")]
    pub max_tool_call_iterations: u32,

    #[serde(default = "default_compression_max_tokens")]
    pub compression_max_tokens: u32,

    /// 外部搜索工具名；需已注册到工具执行器
    #[serde(default)]
    pub web_search_tool: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_researcher_iterations: default_max_researcher_iterations(),
            max_concurrent_research_units: default_max_concurrent_research_units(),
            max_tool_call_iterations: default_max_tool_call_iterations(),
            compression_max_tokens: default_compression_max_tokens(),
            web_search_tool: None,
        }
    }
}

/// 研究各节点共享的依赖
#[derive(Clone)]
pub struct ResearchContext {
    pub model: Arc<dyn ChatModel>,
    pub tools: ToolExecutor,
    pub scheduler: TaskScheduler,
    pub config: ResearchConfig,
}

impl ResearchContext {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolExecutor, scheduler: TaskScheduler, config: ResearchConfig) -> Self {
        Self {
            model,
            tools,
            scheduler,
            config,
        }
    }

    /// 研究员可用的搜索工具（内部搜索在前）
    pub fn search_tools(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.tools.has_tool(ENTERPRISE_SEARCH) {
            names.push(ENTERPRISE_SEARCH.to_string());
        }
        if let Some(web) = &self.config.web_search_tool {
            if web != ENTERPRISE_SEARCH && self.tools.has_tool(web) {
                names.push(web.clone());
            }
        }
        names
    }

    pub(crate) fn researcher_tool_definitions(&self) -> Vec<ToolDefinition> {
        let search = self.search_tools();
        let mut defs: Vec<ToolDefinition> = search
            .iter()
            .filter_map(|name| self.tools.registry().get(name))
            .map(|tool| definition_of(tool.as_ref()))
            .collect();
        defs.push(definition_of(&ThinkTool));
        defs
    }
}
