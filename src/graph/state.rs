//! 图状态
//!
//! 固定的具名字段（对话消息、研究笔记、原始笔记、迭代计数、研究简报、输出）加一个开放的 extras 表。
//! 节点不直接修改状态，而是返回 StateUpdate，由引擎按归并规则合并。

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::llm::Message;

/// 状态键
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StateKey {
    Messages,
    Notes,
    RawNotes,
    Iterations,
    Brief,
    Output,
    Extra(String),
}

impl StateKey {
    /// 是否为序列类型（可使用追加归并）
    pub fn is_sequence(&self) -> bool {
        matches!(
            self,
            StateKey::Messages | StateKey::Notes | StateKey::RawNotes | StateKey::Extra(_)
        )
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Messages => write!(f, "messages"),
            StateKey::Notes => write!(f, "notes"),
            StateKey::RawNotes => write!(f, "raw_notes"),
            StateKey::Iterations => write!(f, "iterations"),
            StateKey::Brief => write!(f, "brief"),
            StateKey::Output => write!(f, "output"),
            StateKey::Extra(name) => write!(f, "extras.{}", name),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphState {
    pub messages: Vec<Message>,
    pub notes: Vec<String>,
    pub raw_notes: Vec<String>,
    pub iterations: u32,
    pub brief: String,
    pub output: String,
    pub extras: HashMap<String, Value>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = brief.into();
        self
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}

/// 节点输出：只包含本次写入的字段
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Option<Vec<Message>>,
    pub notes: Option<Vec<String>>,
    pub raw_notes: Option<Vec<String>>,
    pub iterations: Option<u32>,
    pub brief: Option<String>,
    pub output: Option<String>,
    pub extras: HashMap<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn message(self, message: Message) -> Self {
        self.messages(vec![message])
    }

    pub fn notes(mut self, notes: Vec<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn raw_notes(mut self, raw_notes: Vec<String>) -> Self {
        self.raw_notes = Some(raw_notes);
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
