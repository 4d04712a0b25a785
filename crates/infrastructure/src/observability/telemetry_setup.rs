use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scheduler_config::{LogConfig, OutputFormat};

/// 初始化全局日志订阅者，`RUST_LOG` 优先于配置的级别
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        OutputFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_ids);

            registry.with(fmt_layer).try_init()
        }
        OutputFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_ids);

            registry.with(fmt_layer).try_init()
        }
        OutputFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_thread_ids(config.include_thread_ids);

            registry.with(fmt_layer).try_init()
        }
    }
    .context("日志系统初始化失败")?;

    info!(
        logging.format = ?config.format,
        logging.level = %config.level,
        logging.location = config.include_location,
        "Structured logging initialized"
    );

    Ok(())
}
