use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_config::DispatcherConfig;
use scheduler_core::TaskRegistry;
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};
use scheduler_worker::TaskExecutionWorker;

/// 执行槽位：创建时计数加一，执行结束（包括 panic）时减一
struct ActiveSlot {
    active: Arc<AtomicUsize>,
    metrics: Arc<MetricsCollector>,
}

impl ActiveSlot {
    fn acquire(active: &Arc<AtomicUsize>, metrics: &Arc<MetricsCollector>) -> (Self, usize) {
        let current = active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics.update_active_executions(current);
        (
            Self {
                active: Arc::clone(active),
                metrics: Arc::clone(metrics),
            },
            current,
        )
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.metrics.update_active_executions(remaining);
    }
}

/// 调度循环
///
/// 唯一的调度者：等待下一个到期时间、新任务插入或取消信号，醒来后在并发上限内
/// 分发所有到期任务。达到上限时到期任务原样留在队列中，等下一次唤醒再评估，
/// 循环本身从不阻塞在等待执行槽位上。
pub struct TaskScheduler {
    registry: Arc<TaskRegistry>,
    worker: Arc<TaskExecutionWorker>,
    metrics: Arc<MetricsCollector>,
    config: DispatcherConfig,
    active: Arc<AtomicUsize>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        worker: Arc<TaskExecutionWorker>,
        metrics: Arc<MetricsCollector>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            worker,
            metrics,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_executions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn concurrency_limit(&self) -> usize {
        self.config.max_concurrent_executions.max(1)
    }

    /// 运行直到 `cancel` 触发，然后在宽限期内等待执行中的任务
    pub async fn run(&self, cancel: CancellationToken) {
        let limit = self.concurrency_limit();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        info!("调度循环启动，并发上限 {}", limit);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.dispatch_due(&mut in_flight, limit, &cancel).await;
            let wait = self.next_wait(limit).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.registry.queue().notified() => {
                    debug!("队列有新任务，重新评估");
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        StructuredLogger::log_system_error("dispatcher", "join_execution", &e);
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("调度循环收到停止信号，不再分发新任务");
        self.drain(in_flight).await;
    }

    /// 在并发上限内分发所有到期任务
    async fn dispatch_due(&self, in_flight: &mut JoinSet<()>, limit: usize, cancel: &CancellationToken) {
        loop {
            let active = self.active_executions();
            if active >= limit {
                if self.registry.queue().peek_due(Utc::now()).await.is_some() {
                    self.metrics.record_dispatch_deferred();
                    StructuredLogger::log_dispatch_deferred(
                        self.registry.queue().len().await,
                        active,
                        limit,
                    );
                }
                break;
            }

            let Some((task, key)) = self.registry.take_due(Utc::now()).await else {
                break;
            };

            let (slot, current) = ActiveSlot::acquire(&self.active, &self.metrics);
            self.metrics.record_dispatch();
            StructuredLogger::log_task_dispatched(
                task.id(),
                task.description(),
                key.fire_time,
                current,
                limit,
            );

            let worker = Arc::clone(&self.worker);
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                let _slot = slot;
                let task_id = task.id();
                match worker.execute(task, cancel).await {
                    Ok(report) => debug!(
                        "任务 {} 本轮执行结束: {} (尝试 {} 次)",
                        task_id, report.final_state, report.attempts
                    ),
                    Err(e) => {
                        error!("任务 {} 执行过程出错", task_id);
                        StructuredLogger::log_system_error("worker", "execute", &e);
                    }
                }
            });
        }

        self.metrics
            .update_queue_depth(self.registry.queue().len().await);
    }

    /// 距下一个到期时间的等待时长，不超过轮询间隔；满载时只等轮询间隔或执行结束
    async fn next_wait(&self, limit: usize) -> Duration {
        let poll_interval = self.config.poll_interval();
        if self.active_executions() >= limit {
            return poll_interval;
        }
        match self.registry.queue().next_fire_time().await {
            Some(next) => (next - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(poll_interval),
            None => poll_interval,
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            info!("调度循环已停止");
            return;
        }

        let grace = self.config.shutdown_grace_period();
        info!(
            "等待 {} 个执行中的任务结束，最长 {}s",
            in_flight.len(),
            grace.as_secs()
        );

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    StructuredLogger::log_system_error("dispatcher", "drain", &e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} 个任务在宽限期内未结束，转入后台继续执行",
                in_flight.len()
            );
            in_flight.detach_all();
        } else {
            info!("所有执行中的任务已结束，调度循环已停止");
        }
    }
}
