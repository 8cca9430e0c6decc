//! 状态归并规则
//!
//! 每个键一条规则：Overwrite（覆盖）或 Append（序列拼接）。未登记的键一律覆盖。
//! 规则表在编译期校验并固定，执行期只查表。

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::{GraphError, GraphState, StateKey, StateUpdate};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reducer {
    Overwrite,
    #[default]
    Append,
}

/// 编译后的归并规则表
#[derive(Clone, Debug, Default)]
pub struct ReducerTable {
    rules: HashMap<StateKey, Reducer>,
}

impl ReducerTable {
    pub fn compile(rules: HashMap<StateKey, Reducer>) -> Result<Self, GraphError> {
        for (key, reducer) in &rules {
            if *reducer == Reducer::Append && !key.is_sequence() {
                return Err(GraphError::InvalidReducer(format!(
                    "append reducer on scalar key {}",
                    key
                )));
            }
        }
        Ok(Self { rules })
    }

    pub fn reducer_for(&self, key: &StateKey) -> Reducer {
        self.rules.get(key).copied().unwrap_or(Reducer::Overwrite)
    }

    pub fn apply(&self, state: &mut GraphState, update: StateUpdate) {
        if let Some(messages) = update.messages {
            merge_vec(&mut state.messages, messages, self.reducer_for(&StateKey::Messages));
        }
        if let Some(notes) = update.notes {
            merge_vec(&mut state.notes, notes, self.reducer_for(&StateKey::Notes));
        }
        if let Some(raw_notes) = update.raw_notes {
            merge_vec(&mut state.raw_notes, raw_notes, self.reducer_for(&StateKey::RawNotes));
        }
        if let Some(iterations) = update.iterations {
            state.iterations = iterations;
        }
        if let Some(brief) = update.brief {
            state.brief = brief;
        }
        if let Some(output) = update.output {
            state.output = output;
        }
        for (key, value) in update.extras {
            let reducer = self.reducer_for(&StateKey::Extra(key.clone()));
            match (reducer, state.extras.remove(&key)) {
                (Reducer::Append, Some(existing)) => {
                    state.extras.insert(key, append_value(existing, value));
                }
                _ => {
                    state.extras.insert(key, value);
                }
            }
        }
    }
}

fn merge_vec<T>(target: &mut Vec<T>, incoming: Vec<T>, reducer: Reducer) {
    match reducer {
        Reducer::Append => target.extend(incoming),
        Reducer::Overwrite => *target = incoming,
    }
}

/// extras 的追加：两侧都视为数组拼接，非数组值按单元素处理
fn append_value(existing: Value, incoming: Value) -> Value {
    let mut items = match existing {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    match incoming {
        Value::Array(more) => items.extend(more),
        Value::Null => {}
        other => items.push(other),
    }
    Value::Array(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use serde_json::json;

    fn table(rules: &[(StateKey, Reducer)]) -> ReducerTable {
        ReducerTable::compile(rules.iter().cloned().collect()).unwrap()
    }

    #[test]
    fn test_append_concatenates_notes() {
        let t = table(&[(StateKey::Notes, Reducer::Append)]);
        let mut state = GraphState::new();
        t.apply(&mut state, StateUpdate::new().notes(vec!["a".into()]));
        t.apply(&mut state, StateUpdate::new().notes(vec!["b".into()]));
        assert_eq!(state.notes, vec!["a", "b"]);
    }

    #[test]
    fn test_unregistered_key_overwrites() {
        let t = table(&[]);
        let mut state = GraphState::new().with_messages(vec![Message::user("q")]);
        t.apply(&mut state, StateUpdate::new().message(Message::assistant("a")));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "a");
    }

    #[test]
    fn test_append_on_scalar_rejected() {
        let rules = [(StateKey::Iterations, Reducer::Append)].into_iter().collect();
        assert!(matches!(
            ReducerTable::compile(rules),
            Err(GraphError::InvalidReducer(_))
        ));
    }

    #[test]
    fn test_extra_append_wraps_scalars() {
        let t = table(&[(StateKey::Extra("sources".into()), Reducer::Append)]);
        let mut state = GraphState::new();
        t.apply(&mut state, StateUpdate::new().extra("sources", json!("x")));
        t.apply(&mut state, StateUpdate::new().extra("sources", json!(["y", "z"])));
        assert_eq!(state.extra("sources"), Some(&json!(["x", "y", "z"])));
    }
}
