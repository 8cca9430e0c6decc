//! 图执行引擎
//!
//! 单线程控制流：运行当前节点 → 合并其输出 → 按边选择下一个节点，直到到达 END。
//! 引擎本身不设步数上限，循环由节点在状态中维护的迭代计数约束；并行由节点内部实现。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::graph::{GraphError, GraphState, ReducerTable, StateUpdate};

/// 终止节点名
pub const END: &str = "__end__";

/// 图节点：读取当前状态，返回需要合并的部分状态
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError>;
}

/// 闭包节点，状态以克隆传入
pub struct FnNode<F>(F);

pub fn node_fn<F, Fut>(f: F) -> FnNode<F>
where
    F: Fn(CancellationToken, GraphState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, GraphError>> + Send,
{
    FnNode(f)
}

#[async_trait]
impl<F, Fut> Node for FnNode<F>
where
    F: Fn(CancellationToken, GraphState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, GraphError>> + Send,
{
    async fn run(&self, token: &CancellationToken, state: &GraphState) -> Result<StateUpdate, GraphError> {
        (self.0)(token.clone(), state.clone()).await
    }
}

pub(crate) type Selector = Arc<dyn Fn(&GraphState) -> String + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Edge {
    Direct(String),
    Conditional { targets: Vec<String>, selector: Selector },
}

/// 编译后的图；克隆开销只有几个 Arc
#[derive(Clone)]
pub struct CompiledGraph {
    name: Arc<str>,
    entry: String,
    nodes: Arc<HashMap<String, Arc<dyn Node>>>,
    edges: Arc<HashMap<String, Edge>>,
    reducers: Arc<ReducerTable>,
}

impl CompiledGraph {
    pub(crate) fn new(
        name: String,
        entry: String,
        nodes: HashMap<String, Arc<dyn Node>>,
        edges: HashMap<String, Edge>,
        reducers: ReducerTable,
    ) -> Self {
        Self {
            name: name.into(),
            entry,
            nodes: Arc::new(nodes),
            edges: Arc::new(edges),
            reducers: Arc::new(reducers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn invoke(&self, token: &CancellationToken, mut state: GraphState) -> Result<GraphState, GraphError> {
        let mut current = self.entry.clone();
        let mut steps = 0usize;
        loop {
            if token.is_cancelled() {
                tracing::debug!(graph = %self.name, node = %current, "graph cancelled");
                return Err(GraphError::Cancelled);
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::UnknownNode(current.clone()))?;

            tracing::debug!(graph = %self.name, node = %current, step = steps, "running node");
            let update = node.run(token, &state).await?;
            self.reducers.apply(&mut state, update);
            steps += 1;

            let next = self.next_node(&current, &state)?;
            if next == END {
                tracing::debug!(graph = %self.name, steps, "graph finished");
                return Ok(state);
            }
            current = next;
        }
    }

    fn next_node(&self, current: &str, state: &GraphState) -> Result<String, GraphError> {
        match self.edges.get(current) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { targets, selector }) => {
                let chosen = selector(state);
                if targets.iter().any(|t| *t == chosen) {
                    Ok(chosen)
                } else {
                    Err(GraphError::UnknownNode(chosen))
                }
            }
            None => Err(GraphError::DanglingNode(current.to_string())),
        }
    }
}
