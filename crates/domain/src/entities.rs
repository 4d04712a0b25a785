use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{CompleteHook, FailureHook, StartHook, TaskEvent, TaskHooks};
use crate::ports::TaskAction;
use scheduler_errors::{SchedulerError, TaskId};

/// 任务执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// 状态机：
    /// Pending -> Running | Cancelled
    /// Running -> Succeeded | Failed | Cancelled
    /// Succeeded | Failed -> Pending（仅周期任务重新入队）
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Succeeded, Pending)
                | (Failed, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Running => "Running",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务运行时状态，由注册表持有，只由执行Worker修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// 当前/最近一次分发时的 next_fire_time
    pub scheduled_time: Option<DateTime<Utc>>,
    /// 最近一次尝试的开始时间
    pub last_run_time: Option<DateTime<Utc>>,
    /// 累计尝试次数（含重试），只增不减
    pub execution_count: u32,
    pub last_error: Option<String>,
}

impl TaskStatus {
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            scheduled_time: None,
            last_run_time: None,
            execution_count: 0,
            last_error: None,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::pending()
    }
}

/// 可持久化的任务定义，不包含执行动作和运行时状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub description: String,
    pub next_fire_time: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskDefinition {
    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.group_name.as_deref() == Some(group)
    }
}

/// 注册表中的完整任务：定义 + 执行动作 + 生命周期回调
#[derive(Clone)]
pub struct Task {
    pub definition: TaskDefinition,
    pub action: Arc<dyn TaskAction>,
    pub hooks: TaskHooks,
}

impl Task {
    pub fn new(definition: TaskDefinition, action: Arc<dyn TaskAction>) -> Self {
        Self {
            definition,
            action,
            hooks: TaskHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: TaskHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn id(&self) -> TaskId {
        self.definition.id
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn is_recurring(&self) -> bool {
        self.definition.is_recurring()
    }

    pub fn summary(&self, status: &TaskStatus) -> TaskSummary {
        TaskSummary {
            id: self.definition.id,
            description: self.definition.description.clone(),
            next_fire_time: self.definition.next_fire_time,
            priority: self.definition.priority,
            cron_expression: self.definition.cron_expression.clone(),
            group_name: self.definition.group_name.clone(),
            max_retries: self.definition.max_retries,
            timeout_ms: self.definition.timeout_ms,
            state: status.state,
            execution_count: status.execution_count,
        }
    }

    pub fn event(&self, attempt: u32, scheduled_time: DateTime<Utc>) -> TaskEvent {
        TaskEvent {
            task_id: self.definition.id,
            description: self.definition.description.clone(),
            attempt,
            max_attempts: self.definition.max_attempts(),
            scheduled_time,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("definition", &self.definition)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// 对外暴露的任务快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub description: String,
    pub next_fire_time: DateTime<Utc>,
    pub priority: i32,
    pub cron_expression: Option<String>,
    pub group_name: Option<String>,
    pub max_retries: u32,
    pub timeout_ms: Option<u64>,
    pub state: TaskState,
    pub execution_count: u32,
}

/// 字段级更新，只作用于未运行的任务
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub next_fire_time: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub cron_expression: Option<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next_fire_time(mut self, next_fire_time: DateTime<Utc>) -> Self {
        self.next_fire_time = Some(next_fire_time);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_cron_expression<S: Into<String>>(mut self, expr: S) -> Self {
        self.cron_expression = Some(expr.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.next_fire_time.is_none() && self.priority.is_none() && self.cron_expression.is_none()
    }
}

/// Enqueue 的参数
#[derive(Clone)]
pub struct NewTask {
    pub description: String,
    /// 为空时：一次性任务立即到期，周期任务取CRON的下一次触发时间
    pub due_time: Option<DateTime<Utc>>,
    pub priority: i32,
    pub action: Arc<dyn TaskAction>,
    pub cron_expression: Option<String>,
    pub group_name: Option<String>,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
    pub hooks: TaskHooks,
}

impl NewTask {
    pub fn new<S: Into<String>>(description: S, action: Arc<dyn TaskAction>) -> Self {
        Self {
            description: description.into(),
            due_time: None,
            priority: 0,
            action,
            cron_expression: None,
            group_name: None,
            max_retries: 0,
            timeout: None,
            hooks: TaskHooks::default(),
        }
    }

    pub fn with_due_time(mut self, due_time: DateTime<Utc>) -> Self {
        self.due_time = Some(due_time);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cron<S: Into<String>>(mut self, expr: S) -> Self {
        self.cron_expression = Some(expr.into());
        self
    }

    pub fn with_group<S: Into<String>>(mut self, group: S) -> Self {
        self.group_name = Some(group.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.hooks.on_start = Some(Arc::new(hook) as StartHook);
        self
    }

    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.hooks.on_complete = Some(Arc::new(hook) as CompleteHook);
        self
    }

    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskEvent, &SchedulerError) + Send + Sync + 'static,
    {
        self.hooks.on_failure = Some(Arc::new(hook) as FailureHook);
        self
    }

    /// 组装为注册表中的任务，`next_fire_time` 由调用方解析
    pub fn into_task(self, id: TaskId, next_fire_time: DateTime<Utc>) -> Task {
        let definition = TaskDefinition {
            id,
            description: self.description,
            next_fire_time,
            priority: self.priority,
            cron_expression: self.cron_expression,
            group_name: self.group_name,
            max_retries: self.max_retries,
            timeout_ms: self
                .timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };
        Task::new(definition, self.action).with_hooks(self.hooks)
    }
}

impl fmt::Debug for NewTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewTask")
            .field("description", &self.description)
            .field("due_time", &self.due_time)
            .field("priority", &self.priority)
            .field("cron_expression", &self.cron_expression)
            .field("group_name", &self.group_name)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
