pub mod backoff;
pub mod executors;
pub mod task_execution;

pub use backoff::RetryBackoff;
pub use executors::ShellAction;
pub use task_execution::{ExecutionReport, TaskExecutionWorker};
