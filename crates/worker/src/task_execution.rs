use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scheduler_config::RetryConfig;
use scheduler_core::{next_fire_time, FinishOutcome, TaskRegistry};
use scheduler_domain::{Task, TaskState};
use scheduler_errors::{SchedulerError, SchedulerResult, TaskId};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::backoff::RetryBackoff;

/// 一轮执行（首次尝试 + 重试）的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub task_id: TaskId,
    pub final_state: TaskState,
    pub attempts: u32,
    pub outcome: FinishOutcome,
    pub last_error: Option<String>,
}

/// 执行Worker：对已分发（Running）的任务运行动作，负责超时、重试和回调
///
/// 每次尝试都在超时约束下执行，动作返回错误或 panic 都记为失败。
/// 重试之间按退避策略等待，等待期间可被取消信号打断。
pub struct TaskExecutionWorker {
    registry: Arc<TaskRegistry>,
    backoff: RetryBackoff,
    metrics: Arc<MetricsCollector>,
}

impl TaskExecutionWorker {
    pub fn new(registry: Arc<TaskRegistry>, retry: RetryConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            registry,
            backoff: RetryBackoff::new(retry),
            metrics,
        }
    }

    pub async fn execute(&self, task: Task, cancel: CancellationToken) -> SchedulerResult<ExecutionReport> {
        let task_id = task.id();
        let description = task.description().to_string();
        let scheduled_time = task.definition.next_fire_time;
        let max_attempts = task.definition.max_attempts();
        let started = Instant::now();

        let mut attempt = 0;
        let mut last_error: Option<String> = None;

        let final_state = loop {
            attempt += 1;
            let event = task.event(attempt, scheduled_time);
            if let Some(hook) = &task.hooks.on_start {
                invoke_hook("on_start", task_id, || hook(&event));
            }
            self.registry.record_attempt(task_id, Utc::now()).await?;
            StructuredLogger::log_attempt_started(task_id, &description, attempt, max_attempts);

            let attempt_started = Instant::now();
            let result = run_attempt(&task).await;
            self.metrics
                .record_task_execution(attempt_started.elapsed().as_secs_f64());

            let error = match result {
                Ok(()) => {
                    if let Some(hook) = &task.hooks.on_complete {
                        invoke_hook("on_complete", task_id, || hook(&event));
                    }
                    StructuredLogger::log_task_completed(
                        task_id,
                        &description,
                        attempt,
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    );
                    break TaskState::Succeeded;
                }
                Err(error) => error,
            };

            let message = error.to_string();
            self.metrics.record_task_failure(error.is_timeout());
            StructuredLogger::log_attempt_failed(
                task_id,
                &description,
                attempt,
                max_attempts,
                &message,
                error.is_timeout(),
            );
            self.registry.record_failure(task_id, &error).await?;
            last_error = Some(message);

            if attempt >= max_attempts {
                if let Some(hook) = &task.hooks.on_failure {
                    invoke_hook("on_failure", task_id, || hook(&event, &error));
                }
                StructuredLogger::log_task_failed(
                    task_id,
                    &description,
                    attempt,
                    last_error.as_deref().unwrap_or_default(),
                );
                break TaskState::Failed;
            }

            let delay = self.backoff.delay_for(attempt);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            StructuredLogger::log_task_retry(task_id, &description, attempt + 1, delay_ms);
            self.metrics.record_task_retry(attempt + 1);

            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(hook) = &task.hooks.on_failure {
                        invoke_hook("on_failure", task_id, || hook(&event, &error));
                    }
                    StructuredLogger::log_task_cancelled(task_id, &description, "调度器停止，放弃剩余重试");
                    // 周期任务本轮记为失败，仍按CRON进入下一轮
                    break if task.is_recurring() {
                        TaskState::Failed
                    } else {
                        TaskState::Cancelled
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let reschedule_at = self.next_occurrence(&task, final_state, scheduled_time);
        let outcome = self
            .registry
            .finish_execution(task_id, final_state, reschedule_at)
            .await?;
        match outcome {
            FinishOutcome::Rescheduled(next) => {
                StructuredLogger::log_task_rescheduled(task_id, &description, next);
            }
            FinishOutcome::Dropped => debug!("任务 {} 已在执行期间被删除", task_id),
            FinishOutcome::Finished(_) => {}
        }

        Ok(ExecutionReport {
            task_id,
            final_state,
            attempts: attempt,
            outcome,
            last_error,
        })
    }

    /// 周期任务的下一次触发时间，从 max(now, 本轮计划时间) 之后计算
    fn next_occurrence(
        &self,
        task: &Task,
        final_state: TaskState,
        scheduled_time: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if final_state == TaskState::Cancelled {
            return None;
        }
        let expr = task.definition.cron_expression.as_deref()?;
        let after = Utc::now().max(scheduled_time);
        match next_fire_time(expr, after) {
            Ok(next) => Some(next),
            Err(e) => {
                warn!("周期任务 {} 无法计算下一次触发时间，不再调度: {}", task.id(), e);
                None
            }
        }
    }
}

async fn run_attempt(task: &Task) -> SchedulerResult<()> {
    let action = Arc::clone(&task.action);
    let attempt = AssertUnwindSafe(async move { action.execute().await }).catch_unwind();

    let outcome = match task.definition.timeout().filter(|limit| !limit.is_zero()) {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(SchedulerError::ExecutionTimeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        },
        None => attempt.await,
    };

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SchedulerError::execution_failed(format!("{e:#}"))),
        Err(panic) => Err(SchedulerError::execution_failed(format!(
            "任务动作发生panic: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

/// 回调中的 panic 只记录日志，不影响任务状态
fn invoke_hook<F: FnOnce()>(name: &str, task_id: TaskId, hook: F) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        warn!(
            "任务 {} 的 {} 回调发生panic: {}",
            task_id,
            name,
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
