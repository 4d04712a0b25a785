//! Test helpers for asynchronous assertions

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        Self::wait_for_with_interval(&mut condition, timeout, Duration::from_millis(10)).await
    }

    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        loop {
            if condition().await {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            sleep(poll_interval).await;
        }
    }

    /// 固定的基准时间，用于与当前时间无关的排序断言
    pub fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
