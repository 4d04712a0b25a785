//! 任务生命周期事件与回调

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scheduler_errors::{SchedulerError, TaskId};

/// 传给生命周期回调的上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub description: String,
    /// 从1开始的尝试序号
    pub attempt: u32,
    pub max_attempts: u32,
    pub scheduled_time: DateTime<Utc>,
}

impl TaskEvent {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

pub type StartHook = Arc<dyn Fn(&TaskEvent) + Send + Sync>;
pub type CompleteHook = Arc<dyn Fn(&TaskEvent) + Send + Sync>;
pub type FailureHook = Arc<dyn Fn(&TaskEvent, &SchedulerError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct TaskHooks {
    pub on_start: Option<StartHook>,
    pub on_complete: Option<CompleteHook>,
    pub on_failure: Option<FailureHook>,
}

impl fmt::Debug for TaskHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
