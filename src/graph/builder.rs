//! 图构建器
//!
//! 链式 API 登记节点、边、入口与归并规则，compile() 校验后生成可执行的 CompiledGraph。

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::engine::{CompiledGraph, Edge, Node, Selector};
use crate::graph::{GraphError, GraphState, Reducer, ReducerTable, StateKey, END};

pub struct StateGraph {
    name: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: Vec<(String, Edge)>,
    entry: Option<String>,
    reducers: HashMap<StateKey, Reducer>,
}

impl StateGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            entry: None,
            reducers: HashMap::new(),
        }
    }

    pub fn add_node(self, name: impl Into<String>, node: impl Node + 'static) -> Self {
        self.add_node_arc(name, Arc::new(node))
    }

    pub fn add_node_arc(mut self, name: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    /// 无条件边 from → to（to 可为 END）
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), Edge::Direct(to.into())));
        self
    }

    /// 条件边：selector 根据最新状态返回 targets 中的一个节点名（或 END）
    pub fn add_conditional_edges<F>(mut self, from: impl Into<String>, targets: &[&str], selector: F) -> Self
    where
        F: Fn(&GraphState) -> String + Send + Sync + 'static,
    {
        let selector: Selector = Arc::new(selector);
        self.edges.push((
            from.into(),
            Edge::Conditional {
                targets: targets.iter().map(|t| t.to_string()).collect(),
                selector,
            },
        ));
        self
    }

    pub fn set_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// 为 key 登记追加归并
    pub fn append(self, key: StateKey) -> Self {
        self.reducer(key, Reducer::default())
    }

    pub fn reducer(mut self, key: StateKey, reducer: Reducer) -> Self {
        self.reducers.insert(key, reducer);
        self
    }

    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        let entry = self.entry.ok_or(GraphError::MissingEntryPoint)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownNode(entry));
        }

        let known = |name: &str| name == END || self.nodes.contains_key(name);
        let mut edges: HashMap<String, Edge> = HashMap::new();
        for (from, edge) in self.edges {
            if !self.nodes.contains_key(&from) {
                return Err(GraphError::UnknownNode(from));
            }
            match &edge {
                Edge::Direct(to) => {
                    if !known(to.as_str()) {
                        return Err(GraphError::UnknownNode(to.clone()));
                    }
                }
                Edge::Conditional { targets, .. } => {
                    if let Some(bad) = targets.iter().find(|t| !known(t.as_str())) {
                        return Err(GraphError::UnknownNode(bad.clone()));
                    }
                }
            }
            if edges.contains_key(&from) {
                return Err(GraphError::DuplicateEdge(from));
            }
            edges.insert(from, edge);
        }

        if let Some(dangling) = self.nodes.keys().find(|n| !edges.contains_key(*n)) {
            return Err(GraphError::DanglingNode(dangling.clone()));
        }

        let reducers = ReducerTable::compile(self.reducers)?;
        Ok(CompiledGraph::new(self.name, entry, self.nodes, edges, reducers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{node_fn, StateUpdate};

    fn noop() -> impl Node {
        node_fn(|_token, _state| async { Ok(StateUpdate::new()) })
    }

    #[test]
    fn test_missing_entry_point() {
        let err = StateGraph::new("g").add_node("a", noop()).add_edge("a", END).compile();
        assert!(matches!(err, Err(GraphError::MissingEntryPoint)));
    }

    #[test]
    fn test_unknown_edge_target() {
        let err = StateGraph::new("g")
            .add_node("a", noop())
            .add_edge("a", "b")
            .set_entry_point("a")
            .compile();
        assert!(matches!(err, Err(GraphError::UnknownNode(n)) if n == "b"));
    }

    #[test]
    fn test_unknown_conditional_target() {
        let err = StateGraph::new("g")
            .add_node("a", noop())
            .add_conditional_edges("a", &["a", "ghost"], |_| END.to_string())
            .set_entry_point("a")
            .compile();
        assert!(matches!(err, Err(GraphError::UnknownNode(n)) if n == "ghost"));
    }

    #[test]
    fn test_duplicate_and_dangling() {
        let dup = StateGraph::new("g")
            .add_node("a", noop())
            .add_edge("a", END)
            .add_edge("a", END)
            .set_entry_point("a")
            .compile();
        assert!(matches!(dup, Err(GraphError::DuplicateEdge(_))));

        let dangling = StateGraph::new("g")
            .add_node("a", noop())
            .add_node("b", noop())
            .add_edge("a", "b")
            .set_entry_point("a")
            .compile();
        assert!(matches!(dangling, Err(GraphError::DanglingNode(n)) if n == "b"));
    }

    #[test]
    fn test_invalid_reducer() {
        let err = StateGraph::new("g")
            .add_node("a", noop())
            .add_edge("a", END)
            .set_entry_point("a")
            .append(StateKey::Brief)
            .compile();
        assert!(matches!(err, Err(GraphError::InvalidReducer(_))));
    }
}
