//! WebSocket 网关（feature = "gateway"）
//!
//! 传输层只做三件事：把入站命令转给编排器、把回复分块逐帧写回客户端、连接断开时取消该连接拥有的回复。

mod protocol;
mod server;

pub use protocol::{ClientCommand, ServerEvent};
pub use server::{Gateway, GatewayError};
