use crate::PlatformClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 周期上报服务心跳；失败只记录日志。
pub fn spawn_heartbeat(
    client: Arc<dyn PlatformClient>,
    service_identifier: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match client.heartbeat(&service_identifier).await {
                Ok(()) => debug!(target: "mbgw.platform", service = %service_identifier, "heartbeat_sent"),
                Err(err) => warn!(
                    target: "mbgw.platform",
                    service = %service_identifier,
                    error = %err,
                    "heartbeat_failed"
                ),
            }
        }
    })
}
