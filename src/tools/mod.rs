//! 工具层：注册表、执行器、参数 schema 与内置工具

pub mod enterprise_search;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod think;

pub use enterprise_search::{EnterpriseSearchTool, ENTERPRISE_SEARCH};
pub use executor::{ToolError, ToolExecutor};
pub use registry::{definition_of, Tool, ToolRegistry};
pub use schema::parameters_schema;
pub use think::{ThinkTool, THINK_TOOL};
