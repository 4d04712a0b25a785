use std::time::Duration;

use scheduler_config::RetryConfig;

/// 重试间隔计算：指数退避，封顶后叠加随机抖动
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    config: RetryConfig,
}

impl RetryBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 第 `retry` 次重试（从1开始）前的等待时间
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms.max(self.config.base_delay_ms) as f64;
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;

        let exponential = base * self.config.backoff_multiplier.powi(exponent);
        let capped = if exponential.is_finite() {
            exponential.min(max)
        } else {
            max
        };

        let jitter = if self.config.jitter_factor > 0.0 {
            capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };
        let delay = (capped + jitter).clamp(0.0, max);

        Duration::from_millis(delay.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_without_jitter() {
        let backoff = RetryBackoff::new(RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        });
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_delay() {
        let backoff = RetryBackoff::new(RetryConfig::fixed(250));
        for retry in 1..5 {
            assert_eq!(backoff.delay_for(retry), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = RetryBackoff::new(RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        });
        for _ in 0..100 {
            let delay = backoff.delay_for(2).as_millis();
            assert!((1800..=2200).contains(&delay), "delay {delay} out of range");
        }
    }
}
