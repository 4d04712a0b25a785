//! Test data builders for tasks

use std::sync::Arc;

use chrono::{DateTime, Utc};
use scheduler_domain::{action_fn, Task, TaskAction, TaskDefinition, TaskHooks};
use scheduler_errors::TaskId;

/// 构造注册表中的 `Task`，默认是立即到期、无重试的一次性空任务
pub struct TaskBuilder {
    definition: TaskDefinition,
    action: Arc<dyn TaskAction>,
    hooks: TaskHooks,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            definition: TaskDefinition {
                id: 1,
                description: "test_task".to_string(),
                next_fire_time: Utc::now(),
                priority: 0,
                cron_expression: None,
                group_name: None,
                max_retries: 0,
                timeout_ms: None,
            },
            action: action_fn(|| async { Ok(()) }),
            hooks: TaskHooks::default(),
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.definition.id = id;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.definition.description = description.to_string();
        self
    }

    pub fn with_fire_time(mut self, fire_time: DateTime<Utc>) -> Self {
        self.definition.next_fire_time = fire_time;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.definition.priority = priority;
        self
    }

    pub fn with_cron(mut self, expr: &str) -> Self {
        self.definition.cron_expression = Some(expr.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.definition.group_name = Some(group.to_string());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.definition.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.definition.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_action(mut self, action: Arc<dyn TaskAction>) -> Self {
        self.action = action;
        self
    }

    pub fn with_hooks(mut self, hooks: TaskHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub fn build(self) -> Task {
        Task::new(self.definition, self.action).with_hooks(self.hooks)
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
