pub mod cron_utils;
pub mod queue;
pub mod registry;

pub use cron_utils::{next_fire_time, CronScheduler, SEARCH_HORIZON_DAYS};
pub use queue::{DueTimeQueue, QueueKey};
pub use registry::{FinishOutcome, TaskRegistry};
pub use scheduler_errors::{SchedulerError, SchedulerResult, TaskId};
