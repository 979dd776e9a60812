//! 消息总线能力：遥测、状态与异常上报的发布。
//!
//! ```text
//! session ──► DeviceBus ──► Publisher ──► MQTT broker
//!                │
//!                └── payload: device_id + values
//! ```

mod mqtt;
mod payload;

use async_trait::async_trait;
use domain::{DeviceStatus, ValueMap};
use mbgw_telemetry::{record_publish_failure, record_telemetry_published};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub use mqtt::{MqttConnection, MqttPublisher, qos_from_u8};
pub use payload::{ExceptionReport, exception_payload, status_payload, telemetry_payload};

/// 总线错误。
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("publish error: {0}")]
    Publish(String),
    #[error("payload error: {0}")]
    Payload(String),
}

/// 发布端抽象。
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// 内存发布端，记录所有消息（用于测试与本地调试）。
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// 指定 topic 上的消息，按 JSON 解析。
    pub fn json_on(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, payload)| serde_json::from_slice(&payload).ok())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.messages
            .lock()
            .map_err(|err| BusError::Publish(err.to_string()))?
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// 发布 topic 配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTopics {
    pub telemetry: String,
    pub status: String,
}

impl Default for BusTopics {
    fn default() -> Self {
        Self {
            telemetry: "devices/telemetry".to_string(),
            status: "devices/status".to_string(),
        }
    }
}

/// 设备侧发布入口：把领域数据编码后投递到对应 topic。
#[derive(Clone)]
pub struct DeviceBus {
    publisher: Arc<dyn Publisher>,
    topics: BusTopics,
}

impl DeviceBus {
    pub fn new(publisher: Arc<dyn Publisher>, topics: BusTopics) -> Self {
        Self { publisher, topics }
    }

    pub fn topics(&self) -> &BusTopics {
        &self.topics
    }

    /// 发布子设备遥测。
    pub async fn publish_telemetry(&self, device_id: &str, values: &ValueMap) -> Result<(), BusError> {
        let payload = telemetry_payload(device_id, values)?;
        self.send(&self.topics.telemetry, payload).await?;
        record_telemetry_published();
        Ok(())
    }

    /// 发布网关在线/离线状态。
    pub async fn publish_status(&self, gateway_id: &str, status: DeviceStatus) -> Result<(), BusError> {
        let payload = status_payload(gateway_id, status)?;
        self.send(&self.topics.status, payload).await
    }

    /// 以子设备遥测的形式发布异常报告。
    pub async fn publish_exception(
        &self,
        device_id: &str,
        report: &ExceptionReport,
    ) -> Result<(), BusError> {
        let payload = exception_payload(device_id, report)?;
        self.send(&self.topics.telemetry, payload).await
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        debug!(target: "mbgw.bus", topic = %topic, payload_size = payload.len(), "bus_publish");
        self.publisher.publish(topic, payload).await.inspect_err(|err| {
            record_publish_failure();
            warn!(target: "mbgw.bus", topic = %topic, error = %err, "bus_publish_failed");
        })
    }
}
