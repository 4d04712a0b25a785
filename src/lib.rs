pub mod app;
pub mod shutdown;

pub use app::{Application, TaskFile, TaskFileEntry};
pub use shutdown::ShutdownManager;
