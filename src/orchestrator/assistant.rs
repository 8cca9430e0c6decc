//! 助手配置：回复模式与各步骤开关
//!
//! 对应配置文件的 [reply] 段；每个字段都有默认值，空段即可运行 simple 模式。

use serde::{Deserialize, Serialize};

use crate::research::ResearchConfig;

/// 回复模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// 可选工具调用 + 单次检索 + 生成
    #[default]
    Simple,
    /// 意图分析后按需工具调用 / 两阶段检索
    DeepThink,
    /// 主管 / 研究员委派生成长篇报告
    DeepResearch,
}

fn default_assistant_id() -> String {
    "default".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_tool_iterations() -> u32 {
    5
}

/// 回答模型参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 推理模型：推理分片以 think 分块转发
    #[serde(default)]
    pub reasoning: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            reasoning: false,
        }
    }
}

/// 历史回放
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySettings {
    /// 回放最近 N 条消息；0 关闭
    #[serde(default)]
    pub number: usize,
    /// 历史块字符上限；0 不限
    #[serde(default)]
    pub compression_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tool_iterations")]
    pub max_iterations: u32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_iterations: default_tool_iterations(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasourceSettings {
    #[serde(default)]
    pub enabled: bool,
    /// 允许检索的数据源；为空时不检索
    #[serde(default)]
    pub ids: Vec<String>,
}

impl DatasourceSettings {
    /// 已启用且至少指定了一个数据源
    pub fn is_active(&self) -> bool {
        self.enabled && !self.ids.is_empty()
    }
}

/// deep_think 模式的意图门控
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepThinkSettings {
    /// 由意图分析决定是否检索文档
    #[serde(default)]
    pub pick_datasource: bool,
    /// 由意图分析决定是否调用工具
    #[serde(default)]
    pub pick_tools: bool,
    /// 工具输出超过此长度时认为已得到答案，跳过文档检索；0 关闭
    #[serde(default)]
    pub tools_promised_result_size: usize,
}

/// 一个助手的完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_id")]
    pub id: String,
    #[serde(default)]
    pub mode: ReplyMode,
    #[serde(default)]
    pub role_prompt: String,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub datasource: DatasourceSettings,
    #[serde(default)]
    pub deep_think: DeepThinkSettings,
    #[serde(default)]
    pub deep_research: ResearchConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            id: default_assistant_id(),
            mode: ReplyMode::default(),
            role_prompt: String::new(),
            model: ModelSettings::default(),
            history: HistorySettings::default(),
            tools: ToolSettings::default(),
            datasource: DatasourceSettings::default(),
            deep_think: DeepThinkSettings::default(),
            deep_research: ResearchConfig::default(),
        }
    }
}

impl AssistantConfig {
    pub fn with_mode(mut self, mode: ReplyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AssistantConfig::default();
        assert_eq!(cfg.id, "default");
        assert_eq!(cfg.mode, ReplyMode::Simple);
        assert_eq!(cfg.tools.max_iterations, 5);
        assert!(!cfg.datasource.enabled);
        assert_eq!(cfg.history.number, 0);
    }

    #[test]
    fn test_datasource_needs_ids() {
        let mut ds = DatasourceSettings {
            enabled: true,
            ids: Vec::new(),
        };
        assert!(!ds.is_active());
        ds.ids.push("kb".into());
        assert!(ds.is_active());
        ds.enabled = false;
        assert!(!ds.is_active());
    }

    #[test]
    fn test_partial_json() {
        let cfg: AssistantConfig =
            serde_json::from_str(r#"{"mode":"deep_think","deep_think":{"pick_tools":true}}"#).unwrap();
        assert_eq!(cfg.mode, ReplyMode::DeepThink);
        assert!(cfg.deep_think.pick_tools);
        assert_eq!(cfg.model.max_tokens, 1024);
        assert_eq!(cfg.deep_research.max_concurrent_research_units, 3);
    }
}
