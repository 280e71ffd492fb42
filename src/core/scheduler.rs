//! 任务调度：能力并发限制
//!
//! 同一 Step 内相互独立的能力调用可并发执行，用 Semaphore 限制并发数（默认 3）。

use std::sync::Arc;

use tokio::sync::Semaphore;

/// 任务调度器：能力执行前先取许可
pub struct TaskScheduler {
    /// 能力并发限制（默认 3）
    capability_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_capabilities: usize) -> Self {
        Self {
            capability_semaphore: Arc::new(Semaphore::new(max_concurrent_capabilities.max(1))),
        }
    }

    /// 获取能力执行许可
    pub async fn acquire_capability(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.capability_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed")
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
    async fn test_permits_bound_concurrency() {
        let scheduler = TaskScheduler::new(2);
        let p1 = scheduler.acquire_capability().await;
        let _p2 = scheduler.acquire_capability().await;

        // 第三个许可需等待，释放一个后才能获得
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), scheduler.acquire_capability()).await;
        assert!(blocked.is_err());

        drop(p1);
        let _p3 = tokio::time::timeout(Duration::from_millis(50), scheduler.acquire_capability())
            .await
            .expect("permit should be available after release");
    }
}
