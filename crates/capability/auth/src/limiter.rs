use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// 限制器配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthLimiterConfig {
    pub enabled: bool,
    /// 连续失败多少次后封禁
    pub failure_threshold: u32,
    pub block_duration: Duration,
    /// 同一 IP 的封禁日志最短间隔
    pub log_throttle: Duration,
}

impl Default for AuthLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            block_duration: Duration::from_secs(180),
            log_throttle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct Entry {
    failures: u32,
    blocked_until: Option<Instant>,
    last_log: Option<Instant>,
}

/// 按来源 IP 的注册失败限制器。
///
/// 每个 IP 的状态独立加锁（DashMap 分片），互不阻塞。
pub struct AuthLimiter {
    config: AuthLimiterConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, Entry>,
}

impl AuthLimiter {
    pub fn new(config: AuthLimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AuthLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AuthLimiterConfig {
        &self.config
    }

    /// 当前是否处于封禁期；封禁过期的记录在这里顺带清除。
    pub fn is_blocked(&self, ip: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let now = self.clock.now();
        let expired = match self.entries.get(ip) {
            None => return false,
            Some(entry) => match entry.blocked_until {
                Some(until) if now < until => return true,
                Some(_) => true,
                None => false,
            },
        };
        if expired {
            self.entries.remove(ip);
        }
        false
    }

    /// 记录一次失败，达到阈值时开始封禁。
    pub fn record_failure(&self, ip: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        let mut entry = self.entries.entry(ip.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= self.config.failure_threshold && entry.blocked_until.is_none() {
            entry.blocked_until = Some(now + self.config.block_duration);
            let failures = entry.failures;
            if throttle_passed(entry.last_log, now, self.config.log_throttle) {
                entry.last_log = Some(now);
                warn!(
                    target: "mbgw.auth",
                    ip = %ip,
                    failures,
                    block_secs = self.config.block_duration.as_secs(),
                    "auth_ip_blocked"
                );
            }
        }
    }

    /// 注册成功，清除该 IP 的全部状态。
    pub fn record_success(&self, ip: &str) {
        self.entries.remove(ip);
    }

    /// 每个节流窗口内最多返回一次 true。
    pub fn should_log_block(&self, ip: &str) -> bool {
        let now = self.clock.now();
        let mut entry = self.entries.entry(ip.to_string()).or_default();
        if throttle_passed(entry.last_log, now, self.config.log_throttle) {
            entry.last_log = Some(now);
            true
        } else {
            false
        }
    }

    /// 当前跟踪的 IP 数量。
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

fn throttle_passed(last: Option<Instant>, now: Instant, window: Duration) -> bool {
    last.is_none_or(|last| now.duration_since(last) >= window)
}
