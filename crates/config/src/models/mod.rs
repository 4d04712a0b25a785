pub mod app_config;
pub mod dispatcher;
pub mod logging;
pub mod persistence;
pub mod retry;

pub use app_config::*;
pub use dispatcher::*;
pub use logging::*;
pub use persistence::*;
pub use retry::*;
