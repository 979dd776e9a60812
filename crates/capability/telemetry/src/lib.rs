//! 追踪初始化、进程级计数器与请求 ID 生成。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_blocked: u64,
    pub registrations_ok: u64,
    pub registrations_failed: u64,
    pub polls_ok: u64,
    pub poll_timeouts: u64,
    pub modbus_exceptions: u64,
    pub telemetry_published: u64,
    pub publish_failures: u64,
    pub sessions_closed: u64,
    pub control_writes_ok: u64,
    pub control_writes_failed: u64,
    pub cycle_latency_ms_total: u64,
    pub cycle_latency_ms_count: u64,
}

/// 网关进程计数器。
#[derive(Default)]
pub struct GatewayMetrics {
    connections_accepted: AtomicU64,
    connections_blocked: AtomicU64,
    registrations_ok: AtomicU64,
    registrations_failed: AtomicU64,
    polls_ok: AtomicU64,
    poll_timeouts: AtomicU64,
    modbus_exceptions: AtomicU64,
    telemetry_published: AtomicU64,
    publish_failures: AtomicU64,
    sessions_closed: AtomicU64,
    control_writes_ok: AtomicU64,
    control_writes_failed: AtomicU64,
    cycle_latency_ms_total: AtomicU64,
    cycle_latency_ms_count: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_blocked: self.connections_blocked.load(Ordering::Relaxed),
            registrations_ok: self.registrations_ok.load(Ordering::Relaxed),
            registrations_failed: self.registrations_failed.load(Ordering::Relaxed),
            polls_ok: self.polls_ok.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
            modbus_exceptions: self.modbus_exceptions.load(Ordering::Relaxed),
            telemetry_published: self.telemetry_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            control_writes_ok: self.control_writes_ok.load(Ordering::Relaxed),
            control_writes_failed: self.control_writes_failed.load(Ordering::Relaxed),
            cycle_latency_ms_total: self.cycle_latency_ms_total.load(Ordering::Relaxed),
            cycle_latency_ms_count: self.cycle_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static GatewayMetrics {
    METRICS.get_or_init(GatewayMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录接入的 TCP 连接。
pub fn record_connection_accepted() {
    metrics().connections_accepted.fetch_add(1, Ordering::Relaxed);
}

/// 记录被限制器拒绝的连接。
pub fn record_connection_blocked() {
    metrics().connections_blocked.fetch_add(1, Ordering::Relaxed);
}

pub fn record_registration_ok() {
    metrics().registrations_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_registration_failed() {
    metrics().registrations_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次成功的采集周期。
pub fn record_poll_ok() {
    metrics().polls_ok.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次读超时（每次尝试计一次）。
pub fn record_poll_timeout() {
    metrics().poll_timeouts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_modbus_exception() {
    metrics().modbus_exceptions.fetch_add(1, Ordering::Relaxed);
}

pub fn record_telemetry_published() {
    metrics().telemetry_published.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_closed() {
    metrics().sessions_closed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_control_write_ok() {
    metrics().control_writes_ok.fetch_add(1, Ordering::Relaxed);
}

pub fn record_control_write_failed() {
    metrics().control_writes_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次请求/响应周期耗时（持锁时长）。
pub fn record_cycle_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .cycle_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics.cycle_latency_ms_count.fetch_add(1, Ordering::Relaxed);
}
