//! 有状态的有向图执行引擎
//!
//! - state：类型化的图状态与节点输出
//! - reducer：按键的归并规则（覆盖 / 追加）
//! - builder：StateGraph 链式构建与编译校验
//! - engine：Node trait、CompiledGraph::invoke

pub mod builder;
pub mod engine;
pub mod error;
pub mod reducer;
pub mod state;

pub use builder::StateGraph;
pub use engine::{node_fn, CompiledGraph, FnNode, Node, END};
pub use error::GraphError;
pub use reducer::{Reducer, ReducerTable};
pub use state::{GraphState, StateKey, StateUpdate};
