//! 文档检索：索引抽象与结果格式化

pub mod format;
pub mod index;

pub use format::{display_payload, references_block, summary_block, SUMMARY_LIMIT};
pub use index::{Document, DocumentIndex, DocumentQuery, InMemoryIndex};
