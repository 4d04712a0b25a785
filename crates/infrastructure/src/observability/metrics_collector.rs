//! 调度器指标
//!
//! 通过 `metrics` 门面上报，未安装 recorder 时所有调用都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

pub struct MetricsCollector {
    // 执行指标
    task_executions_total: Counter,
    task_execution_duration: Histogram,
    task_failures_total: Counter,
    task_timeouts_total: Counter,
    task_retries_total: Counter,

    // 调度指标
    tasks_dispatched_total: Counter,
    dispatch_deferred_total: Counter,
    queue_depth: Gauge,
    active_executions: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            task_executions_total: counter!("scheduler_task_executions_total"),
            task_execution_duration: histogram!("scheduler_task_execution_duration_seconds"),
            task_failures_total: counter!("scheduler_task_failures_total"),
            task_timeouts_total: counter!("scheduler_task_timeouts_total"),
            task_retries_total: counter!("scheduler_task_retries_total"),
            tasks_dispatched_total: counter!("scheduler_tasks_dispatched_total"),
            dispatch_deferred_total: counter!("scheduler_dispatch_deferred_total"),
            queue_depth: gauge!("scheduler_queue_depth"),
            active_executions: gauge!("scheduler_active_executions"),
        }
    }

    /// 记录一次尝试结束
    pub fn record_task_execution(&self, duration_seconds: f64) {
        self.task_executions_total.increment(1);
        self.task_execution_duration.record(duration_seconds);
    }

    pub fn record_task_failure(&self, timed_out: bool) {
        self.task_failures_total.increment(1);
        if timed_out {
            self.task_timeouts_total.increment(1);
        }
    }

    pub fn record_task_retry(&self, attempt: u32) {
        self.task_retries_total.increment(1);
        debug!(attempt, "Task retry recorded");
    }

    pub fn record_dispatch(&self) {
        self.tasks_dispatched_total.increment(1);
    }

    pub fn record_dispatch_deferred(&self) {
        self.dispatch_deferred_total.increment(1);
    }

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn update_active_executions(&self, active: usize) {
        self.active_executions.set(active as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
