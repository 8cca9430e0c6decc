//! WebSocket 服务端
//!
//! 每个连接一个读循环与一个写任务：回复任务通过连接共享的 ChannelChunkSender 把分块写入发送队列，
//! 写任务逐帧发出。连接断开（或写失败）时取消 closed 令牌，并取消该连接拥有的全部在途回复。

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::protocol::{ClientCommand, ServerEvent};
use crate::orchestrator::{ReplyOrchestrator, ReplyRequest};
use crate::stream::{ChannelChunkSender, ChunkSender};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket 网关
pub struct Gateway {
    bind_addr: String,
    orchestrator: Arc<ReplyOrchestrator>,
}

impl Gateway {
    pub fn new(bind_addr: impl Into<String>, orchestrator: Arc<ReplyOrchestrator>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            orchestrator,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        let addr: SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", self.bind_addr, e)))?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// 接受连接直到进程关闭
    pub async fn serve(&self, listener: TcpListener) {
        let shutdown = self.orchestrator.shutdown().token();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Gateway listening on ws://{}", addr);
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("gateway stopped accepting connections");
                    break;
                }
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let orchestrator = Arc::clone(&self.orchestrator);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, orchestrator, shutdown).await {
                                tracing::error!(peer = %addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept error");
                    }
                },
            }
        }
    }

    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }
}

struct Connection {
    id: String,
    orchestrator: Arc<ReplyOrchestrator>,
    sender: Arc<dyn ChunkSender>,
    tx: mpsc::UnboundedSender<String>,
}

impl Connection {
    async fn handle_text(&self, text: &str) {
        let event = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => self.handle_command(command).await,
            Err(e) => ServerEvent::error("bad_request", e.to_string()),
        };
        let _ = self.tx.send(event.to_json());
    }

    async fn handle_command(&self, command: ClientCommand) -> ServerEvent {
        match command {
            ClientCommand::SendMessage {
                session_id,
                message,
                assistant_id,
            } => {
                let mut request = ReplyRequest::new(session_id, message).on_connection(self.id.clone());
                request.assistant_id = assistant_id;
                match self.orchestrator.submit(request, Arc::clone(&self.sender)).await {
                    Ok((user, handle)) => ServerEvent::Accepted {
                        session_id: user.session_id,
                        message_id: user.id,
                        reply_id: handle.reply_id,
                    },
                    Err(e) => {
                        tracing::warn!(connection_id = %self.id, error = %e, "submit rejected");
                        ServerEvent::error("submit_failed", e.to_string())
                    }
                }
            }
            ClientCommand::Cancel { session_id, message_id } => {
                let cancelled = self.orchestrator.cancel(&session_id, &message_id);
                tracing::info!(session_id = %session_id, message_id = %message_id, cancelled, "cancel requested");
                ServerEvent::CancelResult {
                    session_id,
                    message_id,
                    cancelled,
                }
            }
            ClientCommand::Ping { timestamp } => ServerEvent::Pong { timestamp },
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    orchestrator: Arc<ReplyOrchestrator>,
    shutdown: CancellationToken,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let connection_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(peer = %addr, connection_id = %connection_id, "websocket connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let closed = CancellationToken::new();

    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_closed.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        writer_closed.cancel();
        let _ = ws_tx.close().await;
    });

    let connection = Connection {
        id: connection_id.clone(),
        orchestrator: Arc::clone(&orchestrator),
        sender: Arc::new(ChannelChunkSender::new(tx.clone(), closed.clone())),
        tx,
    };

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = closed.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => connection.handle_text(&text).await,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "websocket read error");
                break;
            }
        }
    }

    closed.cancel();
    let cancelled = orchestrator.cancel_connection(&connection_id);
    let _ = writer.await;
    tracing::info!(peer = %addr, connection_id = %connection_id, cancelled, "websocket closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_tungstenite::connect_async;

    use crate::llm::{ScriptedModel, ScriptedTurn};
    use crate::memory::InMemoryStore;
    use crate::orchestrator::AssistantConfig;

    async fn start(model: ScriptedModel) -> (SocketAddr, Arc<ReplyOrchestrator>) {
        let orchestrator = Arc::new(ReplyOrchestrator::new(
            Arc::new(model),
            Arc::new(InMemoryStore::new()),
            AssistantConfig::default(),
        ));
        let gateway = Gateway::new("127.0.0.1:0", Arc::clone(&orchestrator));
        let listener = gateway.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { gateway.serve(listener).await });
        (addr, orchestrator)
    }

    fn send_message() -> WsMessage {
        WsMessage::Text(r#"{"type":"send_message","session_id":"s1","message":"What is 2+2?"}"#.to_string())
    }

    #[tokio::test]
    async fn test_reply_streamed_over_websocket() {
        let (addr, _) = start(ScriptedModel::new().then(ScriptedTurn::streamed_text("it is 4"))).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(send_message()).await.unwrap();

        let mut accepted = false;
        let mut ended = false;
        let mut response = String::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(accepted && ended) {
                let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
                    break;
                };
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "accepted" {
                    accepted = true;
                } else if value["chunk_type"] == "reply_end" {
                    ended = true;
                } else if value["chunk_type"] == "response" {
                    response.push_str(value["message_chunk"].as_str().unwrap_or_default());
                }
            }
        })
        .await
        .unwrap();

        assert!(accepted);
        assert!(ended);
        assert_eq!(response, "it is 4");
    }

    #[tokio::test]
    async fn test_ping_and_bad_request() {
        let (addr, _) = start(ScriptedModel::new()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(WsMessage::Text(r#"{"type":"ping","timestamp":5}"#.into())).await.unwrap();
        let Some(Ok(WsMessage::Text(pong))) = ws.next().await else {
            panic!("expected pong");
        };
        assert_eq!(pong, r#"{"type":"pong","timestamp":5}"#);

        ws.send(WsMessage::Text("not json".into())).await.unwrap();
        let Some(Ok(WsMessage::Text(err))) = ws.next().await else {
            panic!("expected error");
        };
        assert!(err.contains("bad_request"));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_replies() {
        let model = ScriptedModel::new()
            .then(ScriptedTurn::streamed_text(&"word ".repeat(200)))
            .with_delay(Duration::from_millis(20));
        let (addr, orchestrator) = start(model).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(send_message()).await.unwrap();

        loop {
            let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
                panic!("connection closed early");
            };
            if text.contains(r#""type":"accepted""#) {
                break;
            }
        }
        assert_eq!(orchestrator.in_flight(), 1);
        drop(ws);

        for _ in 0..100 {
            if orchestrator.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(orchestrator.in_flight(), 0);
    }
}
