//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。请求体按 OpenAI 线上格式组装后反序列化为
//! CreateChatCompletionRequest；流式响应中的文本增量与工具调用增量逐个转为分片。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::CreateChatCompletionRequest;
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};

use crate::llm::{ChatModel, FragmentStream, GenerateOptions, Message, ModelFragment, Role, ToolCallFragment};

/// OpenAI 兼容流式客户端
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn build_request(&self, messages: &[Message], options: &GenerateOptions) -> Result<CreateChatCompletionRequest, String> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
            "stream": true,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if !options.tools.is_empty() {
            body["tools"] = Value::Array(
                options
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        serde_json::from_value(body).map_err(|e| format!("invalid chat request: {}", e))
    }
}

fn to_wire_message(m: &Message) -> Value {
    match m.role {
        Role::System => json!({ "role": "system", "content": m.content }),
        Role::User => json!({ "role": "user", "content": m.content }),
        Role::Assistant if m.has_tool_calls() => json!({
            "role": "assistant",
            "content": m.content,
            "tool_calls": m.tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": { "name": c.name, "arguments": c.arguments },
            })).collect::<Vec<_>>(),
        }),
        Role::Assistant => json!({ "role": "assistant", "content": m.content }),
        Role::Tool => json!({
            "role": "tool",
            "content": m.content,
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
        }),
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<FragmentStream, String> {
        let request = self.build_request(messages, options)?;
        let response = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| e.to_string())?;

        let fragments = response.flat_map(|item| {
            let batch: Vec<Result<ModelFragment, String>> = match item {
                Ok(chunk) => {
                    let mut out = Vec::new();
                    for choice in chunk.choices {
                        let delta = choice.delta;
                        if let Some(content) = delta.content {
                            if !content.is_empty() {
                                out.push(Ok(ModelFragment::Text(content)));
                            }
                        }
                        for call in delta.tool_calls.unwrap_or_default() {
                            let (name, arguments) = call
                                .function
                                .map(|f| (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()))
                                .unwrap_or_default();
                            out.push(Ok(ModelFragment::ToolCall(ToolCallFragment {
                                id: call.id.unwrap_or_default(),
                                name,
                                arguments,
                            })));
                        }
                    }
                    out
                }
                Err(e) => vec![Err(e.to_string())],
            };
            stream::iter(batch)
        });

        Ok(Box::pin(fragments))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
