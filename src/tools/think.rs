//! 反思工具：记录模型的阶段性思考，不产生外部副作用

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::schema::{parameters_schema, ThinkArgs};
use crate::tools::Tool;

pub const THINK_TOOL: &str = "think_tool";

pub struct ThinkTool;

impl ThinkTool {
    pub fn record(reflection: &str) -> String {
        format!("Reflection recorded: {}", reflection)
    }
}

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        THINK_TOOL
    }

    fn description(&self) -> &str {
        "用于反思当前进展并规划下一步。"
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ThinkArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ThinkArgs = serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))?;
        Ok(Self::record(&args.reflection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reflection_recorded() {
        let out = ThinkTool
            .execute(serde_json::json!({"reflection": "need more sources"}))
            .await
            .unwrap();
        assert_eq!(out, "Reflection recorded: need more sources");
    }
}
