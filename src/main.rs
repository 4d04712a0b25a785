use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use scheduler::{Application, ShutdownManager, TaskFile};
use scheduler_config::AppConfig;
use scheduler_core::CronScheduler;
use scheduler_infrastructure::init_logging;

#[derive(Debug, Parser)]
#[command(name = "scheduler", version, about = "进程内任务调度引擎")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 运行调度器直到收到 Ctrl+C 或 SIGTERM
    Run {
        /// 配置文件路径，缺省时只使用默认值和环境变量
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,
        /// TOML任务文件
        #[arg(short, long, value_name = "FILE")]
        tasks: Option<PathBuf>,
    },
    /// 打印CRON表达式接下来的触发时间
    Cron {
        expression: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// 校验配置文件
    CheckConfig {
        #[arg(short, long, value_name = "FILE")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, tasks } => run(config.as_deref(), tasks).await,
        Commands::Cron { expression, count } => print_upcoming(&expression, count),
        Commands::CheckConfig { config } => check_config(&config),
    }
}

async fn run(config_path: Option<&str>, tasks_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    init_logging(&config.logging)?;

    info!("启动任务调度引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let tasks = match &tasks_path {
        Some(path) => TaskFile::load(path)?,
        None => TaskFile::default(),
    };
    if tasks.is_empty() && !config.persistence.load_on_startup {
        info!("没有需要登记的任务，调度器空转等待");
    }

    let shutdown = ShutdownManager::new();
    let listener = shutdown.listen_for_signals();

    let app = Application::new(config, tasks);
    let result = app.run(shutdown.token()).await;

    shutdown.shutdown();
    let _ = listener.await;

    if let Err(e) = &result {
        error!("应用运行失败: {:#}", e);
    }
    info!("任务调度引擎已退出");
    result
}

fn print_upcoming(expression: &str, count: usize) -> Result<()> {
    let scheduler = CronScheduler::new(expression)?;
    let upcoming = scheduler.upcoming_times(Utc::now(), count);
    if upcoming.is_empty() {
        anyhow::bail!("CRON表达式 {expression} 在搜索范围内没有触发时间");
    }
    for time in upcoming {
        println!("{}", time.to_rfc3339());
    }
    Ok(())
}

fn check_config(path: &str) -> Result<()> {
    let config = AppConfig::load(Some(path)).with_context(|| format!("配置无效: {path}"))?;
    println!("配置有效: {path}");
    println!("{}", config.to_toml()?);
    Ok(())
}
