//! 核心层：错误类型、任务注册表、优雅关闭、研究并发调度

pub mod error;
pub mod registry;
pub mod shutdown;
pub mod task_scheduler;

pub use error::{panic_message, ReplyError};
pub use registry::{Registration, TaskGuard, TaskHandle, TaskKey, TaskRegistry};
pub use shutdown::{serve_until_shutdown, ReplyDrain, ShutdownManager, ShutdownReason};
pub use task_scheduler::{ResearchPermit, TaskScheduler};
