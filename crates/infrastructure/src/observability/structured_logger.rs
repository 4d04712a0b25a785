//! Structured logging for task lifecycle events
//!
//! 每个函数输出一条带 `event` 字段的日志，便于在 json 格式下检索。

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use scheduler_errors::TaskId;

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_enqueued(
        task_id: TaskId,
        description: &str,
        next_fire_time: DateTime<Utc>,
        priority: i32,
        recurring: bool,
    ) {
        info!(
            event = "task_enqueued",
            task.id = task_id,
            task.description = description,
            task.next_fire_time = %next_fire_time,
            task.priority = priority,
            task.recurring = recurring,
            "Task enqueued"
        );
    }

    pub fn log_task_dispatched(
        task_id: TaskId,
        description: &str,
        scheduled_time: DateTime<Utc>,
        active: usize,
        limit: usize,
    ) {
        info!(
            event = "task_dispatched",
            task.id = task_id,
            task.description = description,
            task.scheduled_time = %scheduled_time,
            dispatcher.active = active,
            dispatcher.limit = limit,
            "Task dispatched for execution"
        );
    }

    pub fn log_attempt_started(task_id: TaskId, description: &str, attempt: u32, max_attempts: u32) {
        debug!(
            event = "attempt_started",
            task.id = task_id,
            task.description = description,
            task.attempt = attempt,
            task.max_attempts = max_attempts,
            "Task attempt started"
        );
    }

    pub fn log_attempt_failed(
        task_id: TaskId,
        description: &str,
        attempt: u32,
        max_attempts: u32,
        error: &str,
        timed_out: bool,
    ) {
        warn!(
            event = "attempt_failed",
            task.id = task_id,
            task.description = description,
            task.attempt = attempt,
            task.max_attempts = max_attempts,
            task.timed_out = timed_out,
            task.error = error,
            "Task attempt failed"
        );
    }

    pub fn log_task_retry(task_id: TaskId, description: &str, next_attempt: u32, delay_ms: u64) {
        info!(
            event = "task_retry",
            task.id = task_id,
            task.description = description,
            task.next_attempt = next_attempt,
            task.retry_delay_ms = delay_ms,
            "Task retry scheduled"
        );
    }

    pub fn log_task_completed(task_id: TaskId, description: &str, attempts: u32, duration_ms: u64) {
        info!(
            event = "task_completed",
            task.id = task_id,
            task.description = description,
            task.attempts = attempts,
            task.duration_ms = duration_ms,
            "Task completed successfully"
        );
    }

    pub fn log_task_failed(task_id: TaskId, description: &str, attempts: u32, error: &str) {
        error!(
            event = "task_failed",
            task.id = task_id,
            task.description = description,
            task.attempts = attempts,
            task.error = error,
            "Task failed after exhausting retries"
        );
    }

    pub fn log_task_cancelled(task_id: TaskId, description: &str, reason: &str) {
        warn!(
            event = "task_cancelled",
            task.id = task_id,
            task.description = description,
            task.cancel_reason = reason,
            "Task cancelled"
        );
    }

    pub fn log_task_rescheduled(task_id: TaskId, description: &str, next_fire_time: DateTime<Utc>) {
        debug!(
            event = "task_rescheduled",
            task.id = task_id,
            task.description = description,
            task.next_fire_time = %next_fire_time,
            "Recurring task rescheduled"
        );
    }

    pub fn log_dispatch_deferred(queue_depth: usize, active: usize, limit: usize) {
        debug!(
            event = "dispatch_deferred",
            dispatcher.queue_depth = queue_depth,
            dispatcher.active = active,
            dispatcher.limit = limit,
            "Concurrency limit reached, due tasks stay queued"
        );
    }

    pub fn log_snapshot_saved(path: &Path, task_count: usize, duration_ms: u64) {
        info!(
            event = "snapshot_saved",
            snapshot.path = %path.display(),
            snapshot.task_count = task_count,
            snapshot.duration_ms = duration_ms,
            "Task snapshot saved"
        );
    }

    pub fn log_snapshot_loaded(path: &Path, task_count: usize) {
        info!(
            event = "snapshot_loaded",
            snapshot.path = %path.display(),
            snapshot.task_count = task_count,
            "Task snapshot loaded"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}
