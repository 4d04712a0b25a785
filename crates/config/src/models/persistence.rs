use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// 任务定义快照文件路径
    pub snapshot_path: Option<String>,
    /// 启动时从快照恢复任务
    pub load_on_startup: bool,
    /// 关闭时写入快照
    pub save_on_shutdown: bool,
}

impl PersistenceConfig {
    pub fn is_enabled(&self) -> bool {
        self.snapshot_path.is_some()
    }
}

impl ConfigValidator for PersistenceConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        match &self.snapshot_path {
            Some(path) => ValidationUtils::validate_not_empty(path, "persistence.snapshot_path"),
            None if self.load_on_startup || self.save_on_shutdown => {
                Err(crate::ConfigError::Validation(
                    "persistence.snapshot_path is required when load_on_startup or save_on_shutdown is enabled"
                        .to_string(),
                ))
            }
            None => Ok(()),
        }
    }
}
