use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 调度循环配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 同时执行的任务上限
    pub max_concurrent_executions: usize,
    /// 调度循环两次唤醒之间的最长间隔（毫秒）
    pub poll_interval_ms: u64,
    /// Stop 等待在途任务完成的最长时间（秒）
    pub shutdown_grace_period_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 4,
            poll_interval_ms: 1000,
            shutdown_grace_period_seconds: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }

    pub fn with_max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max;
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(
            self.max_concurrent_executions,
            "dispatcher.max_concurrent_executions",
            10000,
        )?;
        if self.poll_interval_ms == 0 || self.poll_interval_ms > 60_000 {
            return Err(crate::ConfigError::Validation(format!(
                "dispatcher.poll_interval_ms must be within 1..=60000, got {}",
                self.poll_interval_ms
            )));
        }
        ValidationUtils::validate_timeout_seconds(
            self.shutdown_grace_period_seconds,
            "dispatcher.shutdown_grace_period_seconds",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_validation() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());

        let invalid_config = config.clone().with_max_concurrent_executions(0);
        assert!(invalid_config.validate().is_err());

        let invalid_config = config.clone().with_poll_interval_ms(0);
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config;
        invalid_config.shutdown_grace_period_seconds = 0;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_dispatcher_durations() {
        let config = DispatcherConfig::default().with_poll_interval_ms(250);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.shutdown_grace_period(), Duration::from_secs(30));
    }
}
