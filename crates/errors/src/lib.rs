use thiserror::Error;


/// 任务标识，在单个调度器实例内唯一且单调递增
pub type TaskId = i64;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: TaskId },
    #[error("任务ID已存在: {id}")]
    DuplicateId { id: TaskId },
    #[error("任务正在运行，无法修改: {id}")]
    TaskBusy { id: TaskId },
    #[error("非法的状态转换: 任务 {id} 从 {from} 到 {to}")]
    InvalidTransition {
        id: TaskId,
        from: String,
        to: String,
    },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无法解析任务动作: {description}")]
    UnresolvedAction { description: String },
    #[error("任务执行失败: {0}")]
    ExecutionFailed(String),
    #[error("任务执行超时: {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },
    #[error("调度器已在运行")]
    AlreadyRunning,
    #[error("持久化错误: {0}")]
    Persistence(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn task_not_found(id: TaskId) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn invalid_cron<E: Into<String>, M: Into<String>>(expr: E, message: M) -> Self {
        Self::InvalidCron {
            expr: expr.into(),
            message: message.into(),
        }
    }
    pub fn invalid_transition<F: ToString, T: ToString>(id: TaskId, from: F, to: T) -> Self {
        Self::InvalidTransition {
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn execution_failed<S: Into<String>>(msg: S) -> Self {
        Self::ExecutionFailed(msg.into())
    }
    pub fn persistence_error<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 执行期错误：由Worker在重试预算内自动重试，只通过回调和lastError暴露
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::ExecutionFailed(_) | SchedulerError::ExecutionTimeout { .. }
        )
    }

    /// 结构性错误：同步返回给调用方，从不自动重试
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskNotFound { .. }
                | SchedulerError::DuplicateId { .. }
                | SchedulerError::TaskBusy { .. }
                | SchedulerError::InvalidTransition { .. }
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::UnresolvedAction { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::ExecutionTimeout { .. })
    }

    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::TaskNotFound { .. } => "请求的任务不存在",
            SchedulerError::DuplicateId { .. } => "任务ID重复",
            SchedulerError::TaskBusy { .. } => "任务正在执行，请稍后重试",
            SchedulerError::InvalidCron { .. } => "CRON表达式配置有误",
            SchedulerError::UnresolvedAction { .. } => "无法恢复任务的执行动作",
            SchedulerError::ExecutionTimeout { .. } => "任务执行超时",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Persistence(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
