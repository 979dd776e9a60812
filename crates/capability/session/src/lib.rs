//! # 网关会话能力模块
//!
//! 一个网关 = 一条 TCP 连接 + 一份配置快照 + 若干采集任务。
//!
//! ```text
//! TcpListener ──► front_door（限流 → 读凭证 → 平台解析）
//!                    │
//!                    ▼
//!              GatewayRuntime::register ──► ConnectionRegistry
//!                    │
//!                    ├── poller × (子设备, 命令) ──► GatewaySession::request ──► DeviceBus
//!                    └── ControlExecutor（MQTT 控制）──┘
//! ```
//!
//! 同一网关上的每次请求/响应都在 `GatewaySession` 的传输锁内完成，
//! 采集与控制写入不会在同一条连接上交错。

mod front_door;
mod poller;
mod registry;
mod reporter;
mod retry;
mod runtime;
mod session;
mod transport;

use mbgw_platform::PlatformError;

pub use front_door::{handle_connection, serve};
pub use registry::ConnectionRegistry;
pub use reporter::exception_report;
pub use retry::RetryPolicy;
pub use runtime::{GatewayRuntime, SessionControl, SessionSettings};
pub use session::{CycleFailure, CycleTimeouts, GatewaySession, Reply};
pub use transport::Transport;

/// 会话层错误。
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("invalid gateway config: {0}")]
    Config(#[from] domain::DomainConfigError),
    #[error("connection not found: {0}")]
    NotConnected(String),
}
