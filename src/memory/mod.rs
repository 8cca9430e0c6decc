//! 会话 / 消息模型、持久化与历史渲染

pub mod history;
pub mod message;
#[cfg(feature = "async-sqlite")]
pub mod sqlite_store;
pub mod store;

pub use history::{render_history, truncate_chars, HISTORY_TEXT_LIMIT};
pub use message::{ChatMessage, MessageType, ProcessingDetail, Session, SessionStatus};
#[cfg(feature = "async-sqlite")]
pub use sqlite_store::SqliteStore;
pub use store::{InMemoryStore, MessageStore, StoreError};
