//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，call(name, 参数文本) 在超时内执行并响应取消；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::ToolDefinition;
use crate::tools::ToolRegistry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    Failed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),

    #[error("Tool call cancelled")]
    Cancelled,
}

/// 工具执行器：超时、取消与审计
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 以模型给出的原始参数文本调用；空文本视为 {}
    pub async fn call(&self, tool_name: &str, arguments: &str, token: &CancellationToken) -> Result<String, ToolError> {
        let args = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: e.to_string(),
            })?
        };
        self.execute(tool_name, args, token).await
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        token: &CancellationToken,
    ) -> Result<String, ToolError> {
        if token.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = tokio::select! {
            _ = token.cancelled() => Err(ToolError::Cancelled),
            r = tokio::time::timeout(self.timeout, tool.execute(args)) => match r {
                Ok(Ok(content)) => Ok(content),
                Ok(Err(e)) => Err(ToolError::Failed(e)),
                Err(_) => Err(ToolError::Timeout(tool_name.to_string())),
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Cancelled) => "cancelled",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn definitions_excluding(&self, exclude: &[&str]) -> Vec<ToolDefinition> {
        self.registry.definitions_excluding(exclude)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
