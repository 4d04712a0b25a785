use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use scheduler_config::AppConfig;
use scheduler_core::{CronScheduler, DueTimeQueue, TaskRegistry};
use scheduler_domain::{
    ActionResolver, NewTask, SnapshotStore, Task, TaskStatus, TaskSummary, TaskUpdate,
};
use scheduler_errors::{SchedulerError, SchedulerResult, TaskId};
use scheduler_infrastructure::{JsonSnapshotStore, MetricsCollector, StructuredLogger};
use scheduler_worker::TaskExecutionWorker;

use crate::scheduler::TaskScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// 队列中等待分发的任务数
    pub queue_size: usize,
    /// 正在执行的任务数
    pub active_executions: usize,
}

struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 调度服务：调用方使用的全部操作
///
/// 每个实例拥有独立的注册表、队列和调度循环，同一进程内可以并存多个实例。
pub struct SchedulerService {
    config: AppConfig,
    registry: Arc<TaskRegistry>,
    scheduler: Arc<TaskScheduler>,
    running: Mutex<Option<LoopHandle>>,
}

impl SchedulerService {
    pub fn new(config: AppConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(TaskRegistry::new(Arc::new(DueTimeQueue::new())));
        let worker = Arc::new(TaskExecutionWorker::new(
            Arc::clone(&registry),
            config.retry.clone(),
            Arc::clone(&metrics),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&registry),
            worker,
            metrics,
            config.dispatcher.clone(),
        ));

        Self {
            config,
            registry,
            scheduler,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 登记新任务
    ///
    /// 周期任务在登记时校验CRON表达式；未指定到期时间时，一次性任务立即到期，
    /// 周期任务取表达式的下一次触发时间。
    pub async fn enqueue(&self, new_task: NewTask) -> SchedulerResult<TaskId> {
        let now = Utc::now();
        let first_fire_time = match (&new_task.cron_expression, new_task.due_time) {
            (Some(expr), due_time) => {
                let next = CronScheduler::new(expr)?.next_fire_time(now)?;
                due_time.unwrap_or(next)
            }
            (None, Some(due_time)) => due_time,
            (None, None) => now,
        };

        let task = new_task.into_task(self.registry.allocate_id(), first_fire_time);
        StructuredLogger::log_task_enqueued(
            task.id(),
            task.description(),
            first_fire_time,
            task.definition.priority,
            task.is_recurring(),
        );
        self.registry.add(task).await
    }

    /// 启动调度循环；`cancel` 触发或调用 `stop` 时循环退出
    pub async fn start(&self, cancel: CancellationToken) -> SchedulerResult<()> {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let token = cancel.child_token();
        let scheduler = Arc::clone(&self.scheduler);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { scheduler.run(loop_token).await });

        *running = Some(LoopHandle {
            cancel: token,
            handle,
        });
        info!("调度服务已启动");
        Ok(())
    }

    /// 停止调度循环并等待执行中的任务（受宽限期限制）
    pub async fn stop(&self) -> SchedulerResult<()> {
        let Some(current) = self.running.lock().await.take() else {
            return Ok(());
        };
        current.cancel.cancel();
        current
            .handle
            .await
            .map_err(|e| SchedulerError::Internal(format!("调度循环异常退出: {e}")))?;
        info!("调度服务已停止");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }

    pub async fn list(&self, group: Option<&str>) -> Vec<TaskSummary> {
        self.registry.list(group).await
    }

    /// 删除任务；运行中的任务在本轮执行结束后不再调度
    ///
    /// 未知ID或重复删除返回 false，不视为错误。
    pub async fn remove(&self, id: TaskId) -> bool {
        self.registry.remove(id).await
    }

    /// 更新未运行任务的到期时间、优先级或CRON表达式
    ///
    /// 未知任务和运行中的任务即使是空更新也返回错误，空更新本身返回 `Ok(false)`。
    pub async fn update(&self, id: TaskId, update: TaskUpdate) -> SchedulerResult<bool> {
        self.registry.update(id, update).await
    }

    pub async fn get_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.registry.status(id).await
    }

    pub async fn get_task(&self, id: TaskId) -> Option<TaskSummary> {
        self.registry.get(id).await
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_size: self.registry.queue().len().await,
            active_executions: self.scheduler.active_executions(),
        }
    }

    /// 清理已终止的一次性任务
    pub async fn purge_finished(&self) -> usize {
        self.registry.purge_finished().await
    }

    /// 保存仍会被调度的任务定义（不含执行动作和运行状态）
    ///
    /// 已终止的任务不写入快照，恢复后不会再次执行。
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SchedulerResult<()> {
        let definitions = self.registry.definitions().await;
        JsonSnapshotStore::new(path.as_ref()).save(&definitions).await
    }

    /// 从快照恢复任务，返回恢复的数量
    ///
    /// 先解析全部动作并检查ID冲突，任一失败则不登记任何任务。
    pub async fn load_from_file<P, R>(&self, path: P, resolver: &R) -> SchedulerResult<usize>
    where
        P: AsRef<Path>,
        R: ActionResolver + ?Sized,
    {
        let definitions = JsonSnapshotStore::new(path.as_ref()).load().await?;

        let mut tasks = Vec::with_capacity(definitions.len());
        let mut seen = HashSet::with_capacity(definitions.len());
        for definition in definitions {
            if !seen.insert(definition.id) || self.registry.contains(definition.id).await {
                return Err(SchedulerError::DuplicateId { id: definition.id });
            }
            if let Some(expr) = &definition.cron_expression {
                CronScheduler::new(expr)?;
            }
            let action = resolver.resolve(&definition.description).ok_or_else(|| {
                SchedulerError::UnresolvedAction {
                    description: definition.description.clone(),
                }
            })?;
            tasks.push(Task::new(definition, action));
        }

        let count = tasks.len();
        for task in tasks {
            self.registry.add(task).await?;
        }
        info!("从 {} 恢复了 {} 个任务", path.as_ref().display(), count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_domain::action_fn;

    fn noop() -> Arc<dyn scheduler_domain::TaskAction> {
        action_fn(|| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_enqueue_assigns_monotonic_ids() {
        let service = SchedulerService::new(AppConfig::default());
        let a = service.enqueue(NewTask::new("a", noop())).await.unwrap();
        let b = service.enqueue(NewTask::new("b", noop())).await.unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(service.stats().await.queue_size, 2);
    }

    #[tokio::test]
    async fn test_enqueue_recurring_without_due_time_uses_cron() {
        let service = SchedulerService::new(AppConfig::default());
        let before = Utc::now();
        let id = service
            .enqueue(NewTask::new("tick", noop()).with_cron("0 0 * * *"))
            .await
            .unwrap();
        let summary = service.get_task(id).await.unwrap();
        assert!(summary.next_fire_time > before);
        assert_eq!(summary.cron_expression.as_deref(), Some("0 0 * * *"));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_cron() {
        let service = SchedulerService::new(AppConfig::default());
        let result = service
            .enqueue(NewTask::new("bad", noop()).with_cron("61 * * * *"))
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron { .. })));
        let result = service
            .enqueue(NewTask::new("never", noop()).with_cron("0 0 30 2 *"))
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron { .. })));
        assert!(service.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_empty_is_noop() {
        let service = SchedulerService::new(AppConfig::default());
        let id = service.enqueue(NewTask::new("a", noop())).await.unwrap();
        assert!(!service.update(id, TaskUpdate::new()).await.unwrap());
        assert!(service
            .update(id, TaskUpdate::new().with_priority(3))
            .await
            .unwrap());
        assert!(matches!(
            service.update(42, TaskUpdate::new().with_priority(3)).await,
            Err(SchedulerError::TaskNotFound { id: 42 })
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected_and_stop_is_idempotent() {
        let service = SchedulerService::new(AppConfig::default());
        service.start(CancellationToken::new()).await.unwrap();
        assert!(service.is_running().await);
        assert!(matches!(
            service.start(CancellationToken::new()).await,
            Err(SchedulerError::AlreadyRunning)
        ));

        service.stop().await.unwrap();
        assert!(!service.is_running().await);
        service.stop().await.unwrap();

        service.start(CancellationToken::new()).await.unwrap();
        service.stop().await.unwrap();
    }
}
