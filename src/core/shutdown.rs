//! 进程关闭与在途回复收尾
//!
//! 关闭令牌是每个回复取消令牌的父令牌，触发关闭即协作式取消所有在途回复。
//! [`ReplyDrain`] 在服务退出后取消仍在注册表中的回复，并等待它们各自收尾
//! （持久化回复、发送 reply_end 后由 TaskGuard 移除条目），整体受超时约束。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::registry::TaskRegistry;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 服务循环自行结束
    ServerStopped,
}

/// 进程级关闭信号
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 为单个回复派生取消令牌（关闭时一并取消）
    pub fn reply_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭；只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut current = self.reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if current.is_some() {
                return;
            }
            tracing::info!(?reason, "shutdown requested");
            *current = Some(reason);
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Ctrl+C 与 SIGTERM 转为关闭请求
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时的在途回复收尾
pub struct ReplyDrain {
    registry: Arc<TaskRegistry>,
    timeout: Duration,
}

impl ReplyDrain {
    pub fn new(registry: Arc<TaskRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 取消剩余回复并等待其收尾；超时返回 false
    pub async fn run(&self) -> bool {
        let cancelled = self.registry.cancel_all();
        if cancelled == 0 {
            return true;
        }
        tracing::info!(cancelled, "waiting for in-flight replies to finalize");

        match tokio::time::timeout(self.timeout, self.registry.wait_empty()).await {
            Ok(()) => {
                tracing::info!(finalized = cancelled, "in-flight replies finalized");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.registry.len(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "replies still running at shutdown deadline"
                );
                false
            }
        }
    }
}

/// 运行服务直到它自行结束或收到关闭信号，然后收尾在途回复
pub async fn serve_until_shutdown<F>(manager: Arc<ShutdownManager>, server: F, drain: ReplyDrain) -> bool
where
    F: Future<Output = ()>,
{
    manager.install_signal_handlers();
    let token = manager.token();

    tokio::select! {
        _ = server => manager.shutdown(ShutdownReason::ServerStopped),
        _ = token.cancelled() => {}
    }
    tracing::info!(reason = ?manager.reason(), "server stopped, draining replies");

    drain.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{TaskGuard, TaskKey};

    fn spawn_reply(registry: &Arc<TaskRegistry>, token: CancellationToken, finalize: Duration) {
        let reg = registry.register(TaskKey::new("s1", "m1"), token.clone(), None);
        let guard = TaskGuard::new(Arc::clone(registry), reg);
        tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(finalize).await;
            drop(guard);
        });
    }

    #[test]
    fn test_reply_token_follows_shutdown() {
        let manager = ShutdownManager::new();
        let reply = manager.reply_token();
        assert!(!reply.is_cancelled());

        manager.shutdown(ShutdownReason::UserInitiated);
        manager.shutdown(ShutdownReason::Signal);
        assert!(manager.is_shutdown());
        assert!(reply.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::UserInitiated));
    }

    #[test]
    fn test_cancelling_reply_does_not_shutdown() {
        let manager = ShutdownManager::new();
        manager.reply_token().cancel();
        assert!(!manager.is_shutdown());
        assert!(manager.reason().is_none());
    }

    #[tokio::test]
    async fn test_drain_cancels_and_waits_for_finalizers() {
        let registry = Arc::new(TaskRegistry::new());
        let token = CancellationToken::new();
        spawn_reply(&registry, token.clone(), Duration::from_millis(30));

        let drained = ReplyDrain::new(Arc::clone(&registry), Duration::from_secs(2)).run().await;
        assert!(drained);
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let registry = Arc::new(TaskRegistry::new());
        let reg = registry.register(TaskKey::new("s1", "stuck"), CancellationToken::new(), None);
        let _guard = TaskGuard::new(Arc::clone(&registry), reg);

        let drained = ReplyDrain::new(Arc::clone(&registry), Duration::from_millis(50)).run().await;
        assert!(!drained);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_server_exit_triggers_drain() {
        let manager = Arc::new(ShutdownManager::new());
        let registry = Arc::new(TaskRegistry::new());
        let reply = manager.reply_token();
        spawn_reply(&registry, reply.clone(), Duration::from_millis(10));

        let server = tokio::time::sleep(Duration::from_millis(10));
        let drain = ReplyDrain::new(Arc::clone(&registry), Duration::from_secs(2));
        assert!(serve_until_shutdown(Arc::clone(&manager), server, drain).await);

        assert_eq!(manager.reason(), Some(ShutdownReason::ServerStopped));
        assert!(reply.is_cancelled());
        assert!(registry.is_empty());
    }
}
