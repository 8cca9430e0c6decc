//! 流式分块协议：分块模型、发送端抽象、单回复有序流

pub mod chunk;
pub mod reply_stream;
pub mod sender;

pub use chunk::{ChunkType, MessageChunk};
pub use reply_stream::{split_payload, ReplyStream, PAYLOAD_CHUNK_BYTES, REPLY_END_TEXT};
pub use sender::{ChannelChunkSender, ChunkSender, MemoryChunkSender, RecordingChunkSender, SendError};
