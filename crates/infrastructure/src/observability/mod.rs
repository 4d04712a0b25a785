//! 可观测性：结构化日志、指标与日志初始化

pub mod metrics_collector;
pub mod structured_logger;
pub mod telemetry_setup;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
pub use telemetry_setup::init_logging;
