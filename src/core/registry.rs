//! 任务注册表：每个 (session, 用户消息) 一个可取消的在途回复任务
//!
//! 取消是协作式的：注册表只持有 CancellationToken，流水线在每个挂起点轮询它。
//! 条目由任务自身通过 [`TaskGuard`] 在退出时移除（成功、取消或 panic 都会执行）。
//! 连接断开时按连接归属线性扫描，一个连接可能拥有多个会话的任务。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// 注册表键：(会话 ID, 被回复的用户消息 ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub session_id: String,
    pub message_id: String,
}

impl TaskKey {
    pub fn new(session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message_id.is_empty() {
            write!(f, "{}", self.session_id)
        } else {
            write!(f, "{}_{}", self.session_id, self.message_id)
        }
    }
}

/// 在途任务句柄
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub cancel: CancellationToken,
    /// 拥有该任务的传输连接（断开时据此清理）
    pub connection_id: Option<String>,
    pub registered_at: i64,
    generation: u64,
}

/// register 的回执：用于只移除自己注册的那一代条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub key: TaskKey,
    generation: u64,
}

/// 并发安全的任务注册表
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskKey, TaskHandle>>,
    next_generation: AtomicU64,
    removed: Notify,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 注册任务；同键再次注册会覆盖旧句柄
    pub fn register(
        &self,
        key: TaskKey,
        cancel: CancellationToken,
        connection_id: Option<String>,
    ) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = TaskHandle {
            cancel,
            connection_id,
            registered_at: chrono::Utc::now().timestamp_millis(),
            generation,
        };
        if self.tasks().insert(key.clone(), handle).is_some() {
            tracing::warn!(task = %key, "task handle overwritten by a new registration");
        }
        Registration { key, generation }
    }

    pub fn lookup(&self, key: &TaskKey) -> Option<CancellationToken> {
        self.tasks().get(key).map(|h| h.cancel.clone())
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks().contains_key(key)
    }

    /// 仅触发取消，条目由任务退出时自行移除
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks().get(key) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => {
                tracing::warn!(task = %key, "task not found, nothing to cancel");
                false
            }
        }
    }

    /// 取消并立即移除
    pub fn cancel_and_forget(&self, key: &TaskKey) -> bool {
        let removed = self.tasks().remove(key);
        match removed {
            Some(handle) => {
                handle.cancel.cancel();
                self.removed.notify_waiters();
                true
            }
            None => {
                tracing::warn!(task = %key, "task not found, nothing to cancel");
                false
            }
        }
    }

    /// 移除本次注册的条目；若已被更新的注册覆盖则保留新条目
    pub fn remove(&self, registration: &Registration) -> bool {
        let removed = {
            let mut tasks = self.tasks();
            match tasks.get(&registration.key) {
                Some(handle) if handle.generation == registration.generation => {
                    tasks.remove(&registration.key).is_some()
                }
                _ => false,
            }
        };
        if removed {
            self.removed.notify_waiters();
        }
        removed
    }

    /// 取消并移除所有满足条件的条目，返回数量
    pub fn remove_all<F>(&self, predicate: F) -> usize
    where
        F: Fn(&TaskKey, &TaskHandle) -> bool,
    {
        let mut tasks = self.tasks();
        let matched: Vec<TaskKey> = tasks
            .iter()
            .filter(|(k, h)| predicate(k, h))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matched {
            if let Some(handle) = tasks.remove(key) {
                handle.cancel.cancel();
            }
        }
        drop(tasks);
        if !matched.is_empty() {
            self.removed.notify_waiters();
        }
        matched.len()
    }

    /// 取消全部任务但保留条目，由各任务收尾后自行移除
    pub fn cancel_all(&self) -> usize {
        let tasks = self.tasks();
        for handle in tasks.values() {
            handle.cancel.cancel();
        }
        tasks.len()
    }

    /// 等待注册表清空
    pub async fn wait_empty(&self) {
        loop {
            let removed = self.removed.notified();
            if self.is_empty() {
                return;
            }
            removed.await;
        }
    }

    /// 传输连接关闭：取消该连接拥有的全部任务
    pub fn cancel_connection(&self, connection_id: &str) -> usize {
        let n = self.remove_all(|_, h| h.connection_id.as_deref() == Some(connection_id));
        if n > 0 {
            tracing::info!(connection_id, cancelled = n, "cancelled tasks of closed connection");
        }
        n
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}

/// RAII 守卫：析构时移除对应注册
pub struct TaskGuard {
    registry: Arc<TaskRegistry>,
    registration: Registration,
}

impl TaskGuard {
    pub fn new(registry: Arc<TaskRegistry>, registration: Registration) -> Self {
        Self {
            registry,
            registration,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.registration.key
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.registration);
        tracing::debug!(task = %self.registration.key, "task removed from registry");
    }
}
