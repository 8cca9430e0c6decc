//! 模型调用的数据类型：对话消息、工具定义、流式分片

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 重组后的完整工具调用
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// 流式响应中的工具调用分片：头分片带 id + 函数名，续分片只带参数后缀
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallFragment {
    pub fn head(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn continuation(arguments: impl Into<String>) -> Self {
        Self {
            arguments: arguments.into(),
            ..Default::default()
        }
    }
}

impl From<ToolCall> for ToolCallFragment {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// 对话消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// tool 消息对应的工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content.into())
        }
    }

    pub fn tool(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content.into())
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn calls_tool(&self, name: &str) -> bool {
        self.tool_calls.iter().any(|c| c.name == name)
    }
}

/// 提供给模型的工具定义
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 生成参数
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Vec<ToolDefinition>,
}

impl GenerateOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// 模型流的单个分片
#[derive(Clone, Debug, PartialEq)]
pub enum ModelFragment {
    Text(String),
    Reasoning(String),
    ToolCall(ToolCallFragment),
}

/// 流结束后的完整响应
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub reasoning: String,
    pub tool_fragments: Vec<ToolCallFragment>,
}

impl ModelResponse {
    pub fn absorb(&mut self, fragment: &ModelFragment) {
        match fragment {
            ModelFragment::Text(t) => self.text.push_str(t),
            ModelFragment::Reasoning(r) => self.reasoning.push_str(r),
            ModelFragment::ToolCall(f) => self.tool_fragments.push(f.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_accumulates() {
        let mut resp = ModelResponse::default();
        resp.absorb(&ModelFragment::Reasoning("think ".into()));
        resp.absorb(&ModelFragment::Text("4".into()));
        resp.absorb(&ModelFragment::Text(".".into()));
        resp.absorb(&ModelFragment::ToolCall(ToolCallFragment::continuation("{}")));
        assert_eq!(resp.text, "4.");
        assert_eq!(resp.reasoning, "think ");
        assert_eq!(resp.tool_fragments.len(), 1);
    }

    #[test]
    fn test_tool_message_shape() {
        let m = Message::tool("call_1", "think_tool", "ok");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
        assert!(v.get("tool_calls").is_none());
    }

    #[test]
    fn test_parse_arguments() {
        #[derive(Deserialize)]
        struct Args {
            query: String,
        }
        let call = ToolCall::new("1", "search", r#"{"query":"rust"}"#);
        assert_eq!(call.parse_arguments::<Args>().unwrap().query, "rust");
        assert!(ToolCall::new("1", "search", "{").parse_arguments::<Args>().is_err());
    }
}
