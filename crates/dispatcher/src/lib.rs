//! 调度循环与对外的调度服务

pub mod scheduler;
pub mod service;

pub use scheduler::TaskScheduler;
pub use service::{SchedulerService, SchedulerStats};
