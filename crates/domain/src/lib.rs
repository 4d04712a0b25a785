pub mod entities;
pub mod events;
pub mod ports;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use scheduler_errors::{SchedulerError, SchedulerResult, TaskId};
