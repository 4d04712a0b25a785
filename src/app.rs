use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scheduler_config::AppConfig;
use scheduler_core::CronScheduler;
use scheduler_dispatcher::SchedulerService;
use scheduler_domain::{ActionCatalog, NewTask, TaskAction};
use scheduler_worker::ShellAction;

/// 任务文件中的一项，执行动作是一条shell命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFileEntry {
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub cron: Option<String>,
    /// 相对启动时刻的延迟；周期任务缺省时取CRON的下一次触发时间
    #[serde(default)]
    pub delay_seconds: Option<u64>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl TaskFileEntry {
    pub fn action(&self) -> Arc<dyn TaskAction> {
        let mut action = ShellAction::new(&self.command);
        if let Some(dir) = &self.working_dir {
            action = action.with_working_dir(dir);
        }
        Arc::new(action)
    }

    pub fn to_new_task(&self) -> NewTask {
        let mut task = NewTask::new(&self.description, self.action())
            .with_priority(self.priority)
            .with_max_retries(self.max_retries);

        if let Some(delay) = self.delay_seconds {
            task = task.with_due_time(Utc::now() + chrono::Duration::seconds(delay as i64));
        }
        if let Some(expr) = &self.cron {
            task = task.with_cron(expr);
        }
        if let Some(group) = &self.group {
            task = task.with_group(group);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            task = task.with_timeout(Duration::from_millis(timeout_ms));
        }
        task
    }
}

/// TOML任务文件，每个 `[[task]]` 表对应一个任务
///
/// ```toml
/// [[task]]
/// description = "cleanup"
/// command = "rm -rf /tmp/cache/*"
/// cron = "0 3 * * *"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskFileEntry>,
}

impl TaskFile {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: TaskFile = toml::from_str(toml_str).context("解析任务文件失败")?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取任务文件失败: {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("任务文件无效: {}", path.display()))
    }

    /// 描述用于从快照恢复时查找动作，必须唯一
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.tasks {
            if entry.description.trim().is_empty() {
                anyhow::bail!("任务描述不能为空");
            }
            if entry.command.trim().is_empty() {
                anyhow::bail!("任务 {} 的命令不能为空", entry.description);
            }
            if !seen.insert(entry.description.as_str()) {
                anyhow::bail!("任务描述重复: {}", entry.description);
            }
            if let Some(expr) = &entry.cron {
                CronScheduler::validate_cron_expression(expr)
                    .with_context(|| format!("任务 {} 的CRON表达式无效", entry.description))?;
            }
        }
        Ok(())
    }

    pub fn catalog(&self) -> ActionCatalog {
        self.tasks.iter().fold(ActionCatalog::new(), |catalog, entry| {
            catalog.with_action(&entry.description, entry.action())
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// 命令行程序的应用实例
pub struct Application {
    config: AppConfig,
    tasks: TaskFile,
    service: SchedulerService,
}

impl Application {
    pub fn new(config: AppConfig, tasks: TaskFile) -> Self {
        let service = SchedulerService::new(config.clone());
        Self {
            config,
            tasks,
            service,
        }
    }

    pub fn service(&self) -> &SchedulerService {
        &self.service
    }

    fn snapshot_path(&self) -> Option<&Path> {
        self.config
            .persistence
            .snapshot_path
            .as_deref()
            .map(Path::new)
    }

    /// 登记任务：配置了启动时加载且快照存在时从快照恢复，否则使用任务文件
    pub async fn register_tasks(&self) -> Result<usize> {
        if self.config.persistence.load_on_startup {
            match self.snapshot_path() {
                Some(path) if path.exists() => {
                    let catalog = self.tasks.catalog();
                    let count = self
                        .service
                        .load_from_file(path, &catalog)
                        .await
                        .with_context(|| format!("从快照恢复任务失败: {}", path.display()))?;
                    return Ok(count);
                }
                Some(path) => {
                    warn!("快照文件 {} 不存在，使用任务文件", path.display());
                }
                None => warn!("未配置快照路径，忽略 load_on_startup"),
            }
        }

        for entry in &self.tasks.tasks {
            self.service
                .enqueue(entry.to_new_task())
                .await
                .with_context(|| format!("登记任务失败: {}", entry.description))?;
        }
        info!("从任务文件登记了 {} 个任务", self.tasks.len());
        Ok(self.tasks.len())
    }

    /// 运行直到 `shutdown` 触发，然后停止调度并按配置保存快照
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let registered = self.register_tasks().await?;
        info!("应用启动，共 {} 个任务", registered);

        self.service
            .start(shutdown.clone())
            .await
            .context("启动调度服务失败")?;

        shutdown.cancelled().await;
        info!("应用收到关闭信号");

        self.service.stop().await.context("停止调度服务失败")?;
        self.save_snapshot().await
    }

    async fn save_snapshot(&self) -> Result<()> {
        if !self.config.persistence.save_on_shutdown {
            return Ok(());
        }
        let Some(path) = self.snapshot_path() else {
            warn!("未配置快照路径，跳过关闭时保存");
            return Ok(());
        };
        self.service
            .save_to_file(path)
            .await
            .with_context(|| format!("保存快照失败: {}", path.display()))
    }
}
