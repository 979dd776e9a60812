//! 控制下发：订阅控制 topic，把 `{key: value}` 交给执行器逐个写入设备。
//!
//! topic 最后一段是子设备 id，例如 `plugin/modbus/devices/telemetry/control/sub-1`。

use async_trait::async_trait;
use mbgw_bus::{MqttConnection, qos_from_u8};
use rumqttc::{AsyncClient, Event, Packet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 控制链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("topic error: {0}")]
    Topic(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("device not found: {0}")]
    UnknownDevice(String),
    #[error("key {key} not configured on device {device_id}")]
    UnknownKey { device_id: String, key: String },
    #[error("gateway offline: {0}")]
    Offline(String),
    #[error("write error: {0}")]
    Write(String),
}

/// 一次写入请求（单个 key）。
#[derive(Debug, Clone, PartialEq)]
pub struct ControlWrite {
    pub device_id: String,
    pub key: String,
    pub value: f64,
}

/// 写入执行器：由会话层实现，走网关连接的加锁收发路径。
#[async_trait]
pub trait ControlExecutor: Send + Sync {
    async fn execute(&self, write: &ControlWrite) -> Result<(), ControlError>;
}

/// 控制订阅配置。
#[derive(Debug, Clone)]
pub struct ControlListenerConfig {
    pub connection: MqttConnection,
    /// 订阅 topic（通常以 `/#` 结尾）
    pub topic: String,
    pub qos: u8,
}

/// 控制消息处理汇总。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ControlSummary {
    pub written: usize,
    pub failed: usize,
}

pub fn spawn_control_listener(
    config: ControlListenerConfig,
    executor: Arc<dyn ControlExecutor>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (client, mut eventloop) = AsyncClient::new(config.connection.options("mbgw-control"), 10);
        if let Err(err) = client
            .subscribe(config.topic.clone(), qos_from_u8(config.qos))
            .await
        {
            warn!(target: "mbgw.control", "mqtt control subscribe error: {}", err);
            return;
        }
        info!(target: "mbgw.control", topic = %config.topic, "control_subscribed");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let executor = executor.clone();
                    // 每条消息单独处理
                    tokio::spawn(async move {
                        if let Err(err) =
                            handle_control_message(executor.as_ref(), &publish.topic, &publish.payload)
                                .await
                        {
                            warn!(
                                target: "mbgw.control",
                                topic = %publish.topic,
                                error = %err,
                                "control_message_skipped"
                            );
                        }
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "mbgw.control", "mqtt control eventloop error: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

/// 处理一条控制消息；单个 key 失败只记录日志，不影响其它 key。
pub async fn handle_control_message(
    executor: &dyn ControlExecutor,
    topic: &str,
    payload: &[u8],
) -> Result<ControlSummary, ControlError> {
    let device_id = device_id_from_topic(topic)?;
    let writes = parse_control_payload(device_id, payload)?;
    let mut summary = ControlSummary::default();
    for write in writes {
        match executor.execute(&write).await {
            Ok(()) => {
                summary.written += 1;
                info!(
                    target: "mbgw.control",
                    device_id = %write.device_id,
                    key = %write.key,
                    value = write.value,
                    "control_write_done"
                );
            }
            Err(err) => {
                summary.failed += 1;
                warn!(
                    target: "mbgw.control",
                    device_id = %write.device_id,
                    key = %write.key,
                    error = %err,
                    "control_write_failed"
                );
            }
        }
    }
    Ok(summary)
}

/// topic 最后一段即子设备 id。
pub fn device_id_from_topic(topic: &str) -> Result<&str, ControlError> {
    topic
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| ControlError::Topic(topic.to_string()))
}

/// 解析 `{key: value}`；数值、布尔与数字字符串都接受。
pub fn parse_control_payload(device_id: &str, payload: &[u8]) -> Result<Vec<ControlWrite>, ControlError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|err| ControlError::Payload(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ControlError::Payload("expected a JSON object".to_string()))?;
    let mut writes = Vec::with_capacity(object.len());
    for (key, raw) in object {
        let value = match raw {
            serde_json::Value::Number(number) => number.as_f64(),
            serde_json::Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(value) = value else {
            warn!(target: "mbgw.control", device_id = %device_id, key = %key, "control_value_not_numeric");
            continue;
        };
        writes.push(ControlWrite {
            device_id: device_id.to_string(),
            key: key.clone(),
            value,
        });
    }
    Ok(writes)
}
