use std::time::Duration;

/// 单次重试等待上限
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// 超时重试策略（指数退避）。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// 首次之外的最多重试次数
    pub max_retries: u32,
    pub interval: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// 不重试（控制写入使用）。
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            interval: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// 第 `attempt` 次失败（从 0 开始）后是否还能重试。
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_retries
    }

    /// 第 `attempt` 次重试前的等待时间：`interval * multiplier^attempt`，不超过 [`MAX_RETRY_DELAY`]。
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(16) as i32);
        let secs = self.interval.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            interval: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}
