use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 重试退避配置
///
/// 第 n 次重试前的等待时间为 `base_delay_ms * backoff_multiplier^(n-1)`，
/// 上限为 `max_delay_ms`，再叠加 `jitter_factor` 比例的随机抖动。
/// `backoff_multiplier = 1.0` 且 `jitter_factor = 0.0` 时即为固定间隔。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// 固定间隔、无抖动
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

impl ConfigValidator for RetryConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(crate::ConfigError::Validation(format!(
                "retry.max_delay_ms ({}) must not be less than retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        ValidationUtils::validate_range(
            self.backoff_multiplier,
            "retry.backoff_multiplier",
            1.0,
            10.0,
        )?;
        ValidationUtils::validate_range(self.jitter_factor, "retry.jitter_factor", 0.0, 1.0)?;
        Ok(())
    }
}
