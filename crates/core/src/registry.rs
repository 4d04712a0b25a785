use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use scheduler_domain::{Task, TaskDefinition, TaskState, TaskStatus, TaskSummary, TaskUpdate};
use scheduler_errors::{SchedulerError, SchedulerResult, TaskId};

use crate::cron_utils::CronScheduler;
use crate::queue::{DueTimeQueue, QueueKey};

#[derive(Debug)]
struct TaskEntry {
    task: Task,
    status: TaskStatus,
    /// 最近一次入队的序号，用于 list 的稳定排序
    sequence: u64,
    /// 运行中被删除：本轮执行结束后丢弃，不再重新调度
    removal_requested: bool,
}

impl TaskEntry {
    fn transition(&mut self, next: TaskState) -> SchedulerResult<TaskState> {
        let current = self.status.state;
        if !current.can_transition_to(next) {
            return Err(SchedulerError::invalid_transition(
                self.task.id(),
                current,
                next,
            ));
        }
        self.status.state = next;
        Ok(current)
    }
}

/// 一轮执行结束后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// 周期任务已带着新的触发时间回到队列
    Rescheduled(DateTime<Utc>),
    /// 一次性任务停留在终止状态
    Finished(TaskState),
    /// 执行期间已被删除，条目已丢弃
    Dropped,
}

/// 任务注册表：任务定义与运行时状态的唯一来源
///
/// 与到期队列共同维护一致性，所有修改都在注册表写锁内完成并同步到队列，
/// 锁只在数据结构修改期间持有，从不在持锁时执行任务动作。
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    queue: Arc<DueTimeQueue>,
    next_id: AtomicI64,
}

impl TaskRegistry {
    pub fn new(queue: Arc<DueTimeQueue>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            queue,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn queue(&self) -> &Arc<DueTimeQueue> {
        &self.queue
    }

    /// 分配新的任务ID
    pub fn allocate_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 登记任务并放入到期队列，状态为 Pending
    pub async fn add(&self, task: Task) -> SchedulerResult<TaskId> {
        let id = task.id();
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(SchedulerError::DuplicateId { id });
        }
        // 外部指定的ID（快照恢复）之后分配的ID必须更大
        self.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);

        let key = self
            .queue
            .insert(id, task.definition.next_fire_time, task.definition.priority)
            .await;
        tasks.insert(
            id,
            TaskEntry {
                task,
                status: TaskStatus::pending(),
                sequence: key.sequence,
                removal_requested: false,
            },
        );
        debug!("任务 {} 已登记，触发时间 {}", id, key.fire_time);
        Ok(id)
    }

    pub async fn contains(&self, id: TaskId) -> bool {
        self.tasks
            .read()
            .await
            .get(&id)
            .is_some_and(|entry| !entry.removal_requested)
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskSummary> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&id)
            .filter(|entry| !entry.removal_requested)
            .map(|entry| entry.task.summary(&entry.status))
    }

    pub async fn get_task(&self, id: TaskId) -> Option<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&id)
            .filter(|entry| !entry.removal_requested)
            .map(|entry| entry.task.clone())
    }

    pub async fn status(&self, id: TaskId) -> Option<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&id)
            .filter(|entry| !entry.removal_requested)
            .map(|entry| entry.status.clone())
    }

    /// 修改未运行任务的触发时间、优先级或CRON表达式
    ///
    /// 未知任务返回 `TaskNotFound`，运行中的任务返回 `TaskBusy`，
    /// 两项检查通过后空更新返回 `Ok(false)`。
    /// 只设置新的CRON表达式时，触发时间按新表达式从当前时刻重新计算。
    pub async fn update(&self, id: TaskId, update: TaskUpdate) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .filter(|entry| !entry.removal_requested)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        if entry.status.state == TaskState::Running {
            return Err(SchedulerError::TaskBusy { id });
        }
        if update.is_empty() {
            return Ok(false);
        }

        let next_from_cron = match (&update.cron_expression, update.next_fire_time) {
            (Some(expr), None) => Some(CronScheduler::new(expr)?.next_fire_time(Utc::now())?),
            (Some(expr), Some(_)) => {
                CronScheduler::validate_cron_expression(expr)?;
                None
            }
            _ => None,
        };

        let definition = &mut entry.task.definition;
        if let Some(expr) = update.cron_expression {
            definition.cron_expression = Some(expr);
        }
        if let Some(fire_time) = update.next_fire_time.or(next_from_cron) {
            definition.next_fire_time = fire_time;
        }
        if let Some(priority) = update.priority {
            definition.priority = priority;
        }

        if entry.status.state == TaskState::Pending {
            let key = self
                .queue
                .insert(id, definition.next_fire_time, definition.priority)
                .await;
            entry.sequence = key.sequence;
        }
        debug!("任务 {} 已更新", id);
        Ok(true)
    }

    /// 删除任务；运行中的任务在本轮执行结束后丢弃
    ///
    /// 返回值表示本次调用是否删除了任务：未知ID或已删除的任务返回 false，
    /// 注册表不变，调用方无需视为错误。
    pub async fn remove(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        if entry.removal_requested {
            return false;
        }
        if entry.status.state == TaskState::Running {
            entry.removal_requested = true;
            info!("任务 {} 正在运行，本轮执行结束后删除", id);
            return true;
        }
        tasks.remove(&id);
        self.queue.remove(id).await;
        info!("任务 {} 已删除", id);
        true
    }

    /// 快照，按 (触发时间, 优先级, 入队顺序) 排序
    pub async fn list(&self, group: Option<&str>) -> Vec<TaskSummary> {
        let tasks = self.tasks.read().await;
        let mut entries: Vec<&TaskEntry> = tasks
            .values()
            .filter(|entry| !entry.removal_requested)
            .filter(|entry| group.is_none_or(|g| entry.task.definition.in_group(g)))
            .collect();
        entries.sort_by_key(|entry| {
            (
                entry.task.definition.next_fire_time,
                entry.task.definition.priority,
                entry.sequence,
            )
        });
        entries
            .into_iter()
            .map(|entry| entry.task.summary(&entry.status))
            .collect()
    }

    /// 仍会被调度的任务定义，按ID排序
    ///
    /// 已进入终止状态的任务不再触发，不会出现在结果中。
    pub async fn definitions(&self) -> Vec<TaskDefinition> {
        let tasks = self.tasks.read().await;
        let mut definitions: Vec<TaskDefinition> = tasks
            .values()
            .filter(|entry| !entry.removal_requested)
            .filter(|entry| !entry.status.state.is_terminal())
            .map(|entry| entry.task.definition.clone())
            .collect();
        definitions.sort_by_key(|definition| definition.id);
        definitions
    }

    /// 状态机迁移，非法迁移返回 `InvalidTransition`
    pub async fn update_status(&self, id: TaskId, next: TaskState) -> SchedulerResult<TaskState> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        entry.transition(next)
    }

    /// 分发：弹出最早的到期任务并转为 Running，返回任务副本和它的队列键
    ///
    /// 队列弹出与状态迁移在同一把注册表写锁内完成，不会与 update/remove 交错。
    pub async fn take_due(&self, now: DateTime<Utc>) -> Option<(Task, QueueKey)> {
        let mut tasks = self.tasks.write().await;
        loop {
            let (id, key) = self.queue.pop_due(now).await?;
            let Some(entry) = tasks
                .get_mut(&id)
                .filter(|entry| !entry.removal_requested)
            else {
                debug!("队列条目 {} 在注册表中不存在，已丢弃", id);
                continue;
            };
            if let Err(e) = entry.transition(TaskState::Running) {
                debug!("跳过无法分发的任务 {}: {}", id, e);
                continue;
            }
            entry.status.scheduled_time = Some(entry.task.definition.next_fire_time);
            return Some((entry.task.clone(), key));
        }
    }

    /// 记录一次尝试开始，返回累计执行次数
    pub async fn record_attempt(&self, id: TaskId, started_at: DateTime<Utc>) -> SchedulerResult<u32> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        if entry.status.state != TaskState::Running {
            return Err(SchedulerError::invalid_transition(
                id,
                entry.status.state,
                TaskState::Running,
            ));
        }
        entry.status.execution_count = entry.status.execution_count.saturating_add(1);
        entry.status.last_run_time = Some(started_at);
        Ok(entry.status.execution_count)
    }

    pub async fn record_failure(&self, id: TaskId, error: &SchedulerError) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        entry.status.last_error = Some(error.to_string());
        Ok(())
    }

    /// 结束一轮执行：迁移到 `outcome`，周期任务带着 `reschedule_at` 回到 Pending 并重新入队
    pub async fn finish_execution(
        &self,
        id: TaskId,
        outcome: TaskState,
        reschedule_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<FinishOutcome> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        entry.transition(outcome)?;

        if entry.removal_requested {
            tasks.remove(&id);
            info!("任务 {} 执行结束，按删除请求丢弃", id);
            return Ok(FinishOutcome::Dropped);
        }

        match reschedule_at {
            Some(next_fire_time) if outcome != TaskState::Cancelled => {
                entry.transition(TaskState::Pending)?;
                entry.task.definition.next_fire_time = next_fire_time;
                let key = self
                    .queue
                    .insert(id, next_fire_time, entry.task.definition.priority)
                    .await;
                entry.sequence = key.sequence;
                Ok(FinishOutcome::Rescheduled(next_fire_time))
            }
            _ => Ok(FinishOutcome::Finished(outcome)),
        }
    }

    /// 清理已终止的一次性任务，返回清理数量
    pub async fn purge_finished(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, entry| !entry.status.state.is_terminal());
        before - tasks.len()
    }

    pub async fn len(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|entry| !entry.removal_requested)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use scheduler_domain::{action_fn, NewTask};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn new_registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(DueTimeQueue::new()))
    }

    fn task(registry: &TaskRegistry, description: &str, fire_time: DateTime<Utc>, priority: i32) -> Task {
        NewTask::new(description, action_fn(|| async { Ok(()) }))
            .with_priority(priority)
            .into_task(registry.allocate_id(), fire_time)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = new_registry();
        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();

        let summary = registry.get(id).await.unwrap();
        assert_eq!(summary.description, "a");
        assert_eq!(summary.state, TaskState::Pending);
        assert_eq!(registry.status(id).await.unwrap().execution_count, 0);
        assert!(registry.queue().contains(id).await);
        assert!(registry.get(999).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = new_registry();
        let first = task(&registry, "a", base(), 0);
        let duplicate = first.clone();
        registry.add(first).await.unwrap();

        let result = registry.add(duplicate).await;
        assert!(matches!(result, Err(SchedulerError::DuplicateId { .. })));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_explicit_ids_advance_allocator() {
        let registry = new_registry();
        let explicit = NewTask::new("restored", action_fn(|| async { Ok(()) })).into_task(41, base());
        registry.add(explicit).await.unwrap();
        assert_eq!(registry.allocate_id(), 42);
    }

    #[tokio::test]
    async fn test_list_ordering_and_group_filter() {
        let registry = new_registry();
        let t = base();
        let mut late = task(&registry, "late", t + Duration::seconds(30), 0);
        late.definition.group_name = Some("g1".to_string());
        registry.add(late).await.unwrap();
        registry.add(task(&registry, "low", t, 5)).await.unwrap();
        let mut high = task(&registry, "high", t, 1);
        high.definition.group_name = Some("g1".to_string());
        registry.add(high).await.unwrap();
        registry.add(task(&registry, "low-2", t, 5)).await.unwrap();

        let names: Vec<String> = registry
            .list(None)
            .await
            .into_iter()
            .map(|s| s.description)
            .collect();
        assert_eq!(names, vec!["high", "low", "low-2", "late"]);

        let grouped: Vec<String> = registry
            .list(Some("g1"))
            .await
            .into_iter()
            .map(|s| s.description)
            .collect();
        assert_eq!(grouped, vec!["high", "late"]);
    }

    #[tokio::test]
    async fn test_update_pending_task_requeues() {
        let registry = new_registry();
        let t = base();
        let first = registry.add(task(&registry, "first", t, 5)).await.unwrap();
        let second = registry.add(task(&registry, "second", t, 5)).await.unwrap();

        registry
            .update(second, TaskUpdate::new().with_priority(0))
            .await
            .unwrap();

        let (next, _) = registry.queue().pop_due(t).await.unwrap();
        assert_eq!(next, second);
        let (after, _) = registry.queue().pop_due(t).await.unwrap();
        assert_eq!(after, first);
        assert_eq!(registry.status(second).await.unwrap().execution_count, 0);
    }

    #[tokio::test]
    async fn test_update_with_cron_recomputes_fire_time() {
        let registry = new_registry();
        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();

        registry
            .update(id, TaskUpdate::new().with_cron_expression("0 0 * * *"))
            .await
            .unwrap();
        let summary = registry.get(id).await.unwrap();
        assert_eq!(summary.cron_expression.as_deref(), Some("0 0 * * *"));
        assert!(summary.next_fire_time > Utc::now());

        let result = registry
            .update(id, TaskUpdate::new().with_cron_expression("not a cron"))
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron { .. })));
    }

    #[tokio::test]
    async fn test_update_errors() {
        let registry = new_registry();
        let result = registry.update(7, TaskUpdate::new().with_priority(1)).await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound { id: 7 })));

        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();
        registry.take_due(base()).await.unwrap();
        let result = registry.update(id, TaskUpdate::new().with_priority(1)).await;
        assert!(matches!(result, Err(SchedulerError::TaskBusy { .. })));
    }

    #[tokio::test]
    async fn test_empty_update_still_checks_task() {
        let registry = new_registry();
        let result = registry.update(7, TaskUpdate::new()).await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound { id: 7 })));

        let idle = registry
            .add(task(&registry, "idle", base() + Duration::hours(1), 0))
            .await
            .unwrap();
        assert!(!registry.update(idle, TaskUpdate::new()).await.unwrap());

        let busy = registry.add(task(&registry, "busy", base(), 0)).await.unwrap();
        let (taken, _) = registry.take_due(base()).await.unwrap();
        assert_eq!(taken.id(), busy);
        let result = registry.update(busy, TaskUpdate::new()).await;
        assert!(matches!(result, Err(SchedulerError::TaskBusy { .. })));

        let removed = registry
            .add(task(&registry, "gone", base() + Duration::hours(2), 0))
            .await
            .unwrap();
        assert!(registry.remove(removed).await);
        let result = registry.update(removed, TaskUpdate::new()).await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_definitions_skip_terminal_tasks() {
        let registry = new_registry();
        let one_off = registry.add(task(&registry, "once", base(), 0)).await.unwrap();
        let mut recurring = task(&registry, "cron", base() + Duration::seconds(1), 0);
        recurring.definition.cron_expression = Some("* * * * *".to_string());
        let recurring = registry.add(recurring).await.unwrap();
        let later = registry
            .add(task(&registry, "later", base() + Duration::hours(1), 0))
            .await
            .unwrap();

        registry.take_due(base()).await.unwrap();
        let outcome = registry
            .finish_execution(one_off, TaskState::Succeeded, None)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Finished(TaskState::Succeeded));
        assert_eq!(registry.len().await, 3);

        let ids: Vec<_> = registry.definitions().await.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![recurring, later]);
    }

    #[tokio::test]
    async fn test_remove_pending_task() {
        let registry = new_registry();
        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();

        assert!(registry.remove(id).await);
        assert!(registry.status(id).await.is_none());
        assert!(!registry.queue().contains(id).await);
        assert!(!registry.remove(id).await);
    }

    #[tokio::test]
    async fn test_remove_running_task_is_dropped_after_finish() {
        let registry = new_registry();
        let mut recurring = task(&registry, "a", base(), 0);
        recurring.definition.cron_expression = Some("* * * * *".to_string());
        let id = registry.add(recurring).await.unwrap();
        registry.take_due(base()).await.unwrap();

        assert!(registry.remove(id).await);
        assert!(registry.get(id).await.is_none());

        let outcome = registry
            .finish_execution(id, TaskState::Succeeded, Some(base() + Duration::minutes(1)))
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Dropped);
        assert!(registry.queue().is_empty().await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_execution_lifecycle_one_off() {
        let registry = new_registry();
        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();
        let (dispatched, key) = registry.take_due(base()).await.unwrap();
        assert_eq!(dispatched.id(), id);
        assert_eq!(key.fire_time, base());
        let status = registry.status(id).await.unwrap();
        assert_eq!(status.state, TaskState::Running);
        assert_eq!(status.scheduled_time, Some(base()));

        assert_eq!(registry.record_attempt(id, Utc::now()).await.unwrap(), 1);
        registry
            .record_failure(id, &SchedulerError::execution_failed("boom"))
            .await
            .unwrap();
        assert_eq!(registry.record_attempt(id, Utc::now()).await.unwrap(), 2);

        let outcome = registry
            .finish_execution(id, TaskState::Failed, None)
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Finished(TaskState::Failed));

        let status = registry.status(id).await.unwrap();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.execution_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("任务执行失败: boom"));
        assert!(!registry.queue().contains(id).await);

        assert_eq!(registry.purge_finished().await, 1);
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_recurring_finish_reschedules() {
        let registry = new_registry();
        let mut recurring = task(&registry, "tick", base(), 0);
        recurring.definition.cron_expression = Some("*/5 * * * * *".to_string());
        let id = registry.add(recurring).await.unwrap();
        registry.take_due(base()).await.unwrap();

        let next = base() + Duration::seconds(5);
        let outcome = registry
            .finish_execution(id, TaskState::Succeeded, Some(next))
            .await
            .unwrap();
        assert_eq!(outcome, FinishOutcome::Rescheduled(next));
        assert_eq!(registry.status(id).await.unwrap().state, TaskState::Pending);
        assert_eq!(registry.queue().next_fire_time().await, Some(next));
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let registry = new_registry();
        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();

        let result = registry.update_status(id, TaskState::Succeeded).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTransition { .. })));

        registry.take_due(base()).await.unwrap();
        registry.update_status(id, TaskState::Succeeded).await.unwrap();

        let result = registry.update_status(id, TaskState::Running).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTransition { .. })));
        let result = registry.record_attempt(id, Utc::now()).await;
        assert!(matches!(result, Err(SchedulerError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_take_due_skips_stale_queue_entries() {
        let registry = new_registry();
        registry.queue().insert(99, base(), -1).await;
        let id = registry.add(task(&registry, "a", base(), 0)).await.unwrap();

        let (dispatched, _) = registry.take_due(base()).await.unwrap();
        assert_eq!(dispatched.id(), id);
        assert!(registry.take_due(base()).await.is_none());
        assert!(registry.queue().is_empty().await);
    }

    #[tokio::test]
    async fn test_take_due_respects_now() {
        let registry = new_registry();
        registry
            .add(task(&registry, "later", base() + Duration::seconds(10), 0))
            .await
            .unwrap();
        assert!(registry.take_due(base()).await.is_none());
        assert_eq!(registry.queue().len().await, 1);
    }
}
