//! # Scheduler Testing Utils
//!
//! 其他 crate 测试共用的构造器、带计数的任务动作和等待工具。
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
