//! 工具参数 JSON Schema（schemars 自动生成）
//!
//! 参数结构体同时用于反序列化模型给出的参数与生成提供给模型的 schema，两者保持一致。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

/// 委派研究：一个独立、描述完整的研究主题
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConductResearchArgs {
    /// 研究主题，至少一段话的详细描述
    pub research_topic: String,
}

/// 标记研究完成
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ResearchCompleteArgs {
    #[serde(default)]
    pub complete: bool,
}

/// 反思：记录当前进展与下一步计划
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThinkArgs {
    pub reflection: String,
}

/// 搜索查询
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchArgs {
    pub query: String,
}

/// 生成 T 的参数 schema，去掉模型接口不需要的元信息键
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}
