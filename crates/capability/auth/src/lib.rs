//! 接入认证能力：按来源 IP 限制注册失败次数。
//!
//! 设备连上网关端口后先发送注册凭证；凭证解析失败（读超时、平台拒绝）
//! 累计到阈值后该 IP 被封禁一段时间，封禁期内的新连接直接关闭，
//! 不再消耗平台的注册请求。

mod clock;
mod limiter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{AuthLimiter, AuthLimiterConfig};
