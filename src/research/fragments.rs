//! 工具调用分片重组
//!
//! 流式模型可能把一次工具调用拆成多个分片：带函数名的头分片开始一个新调用，
//! 函数名为空且参数非空的续分片追加到当前调用的参数末尾。没有当前调用的续分片被丢弃。

use crate::llm::{ToolCall, ToolCallFragment};

pub fn reconstruct_tool_calls(fragments: &[ToolCallFragment]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut current: Option<ToolCall> = None;

    for fragment in fragments {
        if !fragment.name.is_empty() {
            if let Some(done) = current.take() {
                calls.push(done);
            }
            let id = if fragment.id.is_empty() {
                format!("call_{}", calls.len() + 1)
            } else {
                fragment.id.clone()
            };
            current = Some(ToolCall::new(id, fragment.name.clone(), fragment.arguments.clone()));
        } else if !fragment.arguments.is_empty() {
            match current.as_mut() {
                Some(call) => call.arguments.push_str(&fragment.arguments),
                None => tracing::debug!(arguments = %fragment.arguments, "dropping orphan tool call fragment"),
            }
        }
    }

    if let Some(done) = current {
        calls.push(done);
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joins_continuations() {
        let fragments = vec![
            ToolCallFragment::head("c1", "conduct_research", "{\"research_"),
            ToolCallFragment::continuation("topic\": \"rust"),
            ToolCallFragment::continuation("\"}"),
            ToolCallFragment::head("c2", "think_tool", "{\"reflection\":\"ok\"}"),
        ];
        let calls = reconstruct_tool_calls(&fragments);
        assert_eq!(
            calls,
            vec![
                ToolCall::new("c1", "conduct_research", "{\"research_topic\": \"rust\"}"),
                ToolCall::new("c2", "think_tool", "{\"reflection\":\"ok\"}"),
            ]
        );
    }

    #[test]
    fn test_complete_calls_unchanged() {
        let complete = vec![
            ToolCall::new("a", "enterprise_search", "{\"query\":\"x\"}"),
            ToolCall::new("b", "think_tool", "{\"reflection\":\"y\"}"),
            ToolCall::new("c", "research_complete", "{}"),
        ];
        let fragments: Vec<ToolCallFragment> = complete.iter().cloned().map(ToolCallFragment::from).collect();
        let once = reconstruct_tool_calls(&fragments);
        assert_eq!(once, complete);

        let again: Vec<ToolCallFragment> = once.iter().cloned().map(ToolCallFragment::from).collect();
        assert_eq!(reconstruct_tool_calls(&again), complete);
    }

    #[test]
    fn test_orphan_and_empty_fragments() {
        let fragments = vec![
            ToolCallFragment::continuation("{\"lost\":1}"),
            ToolCallFragment::default(),
            ToolCallFragment::head("", "think_tool", ""),
            ToolCallFragment::continuation("{}"),
        ];
        let calls = reconstruct_tool_calls(&fragments);
        assert_eq!(calls, vec![ToolCall::new("call_1", "think_tool", "{}")]);
    }
}
