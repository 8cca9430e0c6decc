//! 任务调度：研究员子任务并发限制
//!
//! 使用 Semaphore 限制同时在途的研究员图调用数；获取许可的等待同样响应取消。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// 研究员并发调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    research_semaphore: Arc<Semaphore>,
    limit: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// 研究许可：析构时归还并更新在途计数
#[derive(Debug)]
pub struct ResearchPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ResearchPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskScheduler {
    pub fn new(max_concurrent_research: usize) -> Self {
        let limit = max_concurrent_research.max(1);
        Self {
            research_semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 获取研究许可；取消时返回 None
    pub async fn acquire_research(&self, token: &CancellationToken) -> Option<ResearchPermit> {
        let permit = tokio::select! {
            _ = token.cancelled() => return None,
            permit = Arc::clone(&self.research_semaphore).acquire_owned() => permit.ok()?,
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Some(ResearchPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 历史最高在途数
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_bound_in_flight() {
        let scheduler = TaskScheduler::new(2);
        let token = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let scheduler = scheduler.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let _permit = scheduler.acquire_research(&token).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(scheduler.peak(), 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_acquire_observes_cancel() {
        let scheduler = TaskScheduler::new(1);
        let token = CancellationToken::new();
        let _held = scheduler.acquire_research(&token).await.unwrap();

        let waiter = {
            let scheduler = scheduler.clone();
            let token = token.clone();
            tokio::spawn(async move { scheduler.acquire_research(&token).await.is_none() })
        };
        token.cancel();
        assert!(waiter.await.unwrap());
    }
}
