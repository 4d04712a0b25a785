//! Instrumented task actions and hook recorders
//!
//! 每个动作都可以 `Arc` 共享：一份交给调度器执行，一份留在测试里读取计数。

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use scheduler_domain::{TaskAction, TaskEvent, TaskHooks};
use scheduler_errors::{SchedulerError, TaskId};

/// 记录调用次数，总是成功
#[derive(Debug, Default)]
pub struct CountingAction {
    calls: AtomicU32,
}

impl CountingAction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskAction for CountingAction {
    async fn execute(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 前 `failures` 次调用失败，之后成功
#[derive(Debug)]
pub struct FailingAction {
    failures: u32,
    calls: AtomicU32,
}

impl FailingAction {
    pub fn always() -> Arc<Self> {
        Self::failing_times(u32::MAX)
    }

    pub fn failing_times(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskAction for FailingAction {
    async fn execute(&self) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("simulated failure #{call}");
        }
        Ok(())
    }
}

/// 睡眠指定时间后成功
#[derive(Debug)]
pub struct SleepingAction {
    duration: Duration,
    completed: AtomicU32,
}

impl SleepingAction {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            completed: AtomicU32::new(0),
        })
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskAction for SleepingAction {
    async fn execute(&self) -> anyhow::Result<()> {
        tokio::time::sleep(self.duration).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 阻塞直到测试放行，同时统计并发执行数
///
/// 同一个闸门可以被多个任务共享，用来观察并发上限。
#[derive(Debug)]
pub struct GatedAction {
    gate: Semaphore,
    started: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedAction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    /// 放行 `n` 个等待中的执行
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// 永久打开闸门
    pub fn open(&self) {
        self.gate.close();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskAction for GatedAction {
    async fn execute(&self) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        // 闸门关闭后 acquire 返回 Err，同样视为放行
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    Start { task_id: TaskId, attempt: u32 },
    Complete { task_id: TaskId, attempt: u32 },
    Failure { task_id: TaskId, attempt: u32, error: String },
}

/// 记录生命周期回调的调用顺序
#[derive(Debug, Clone, Default)]
pub struct HookRecorder {
    calls: Arc<Mutex<Vec<HookCall>>>,
}

impl HookRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(&self) -> TaskHooks {
        let on_start = Arc::clone(&self.calls);
        let on_complete = Arc::clone(&self.calls);
        let on_failure = Arc::clone(&self.calls);
        TaskHooks {
            on_start: Some(Arc::new(move |event: &TaskEvent| {
                push(
                    &on_start,
                    HookCall::Start {
                        task_id: event.task_id,
                        attempt: event.attempt,
                    },
                )
            })),
            on_complete: Some(Arc::new(move |event: &TaskEvent| {
                push(
                    &on_complete,
                    HookCall::Complete {
                        task_id: event.task_id,
                        attempt: event.attempt,
                    },
                )
            })),
            on_failure: Some(Arc::new(move |event: &TaskEvent, error: &SchedulerError| {
                push(
                    &on_failure,
                    HookCall::Failure {
                        task_id: event.task_id,
                        attempt: event.attempt,
                        error: error.to_string(),
                    },
                )
            })),
        }
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn count_starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, HookCall::Start { .. }))
            .count()
    }

    pub fn count_failures(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, HookCall::Failure { .. }))
            .count()
    }
}

fn push(calls: &Mutex<Vec<HookCall>>, call: HookCall) {
    if let Ok(mut calls) = calls.lock() {
        calls.push(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_action_recovers() {
        let action = FailingAction::failing_times(2);
        assert!(action.execute().await.is_err());
        assert!(action.execute().await.is_err());
        assert!(action.execute().await.is_ok());
        assert_eq!(action.calls(), 3);
    }

    #[tokio::test]
    async fn test_gated_action_tracks_concurrency() {
        let action = GatedAction::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let action = Arc::clone(&action);
                tokio::spawn(async move { action.execute().await })
            })
            .collect();

        while action.started() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(action.running(), 3);

        action.open();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(action.finished(), 3);
        assert_eq!(action.max_running(), 3);
        assert_eq!(action.running(), 0);
    }
}
