use crate::{BusError, Publisher};
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::warn;

/// Broker 连接参数。
#[derive(Debug, Clone)]
pub struct MqttConnection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MqttConnection {
    /// 构造客户端参数，client id 为 `{prefix}-{uuid}`。
    pub fn options(&self, client_prefix: &str) -> MqttOptions {
        let client_id = format!("{}-{}", client_prefix, uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }
}

/// MQTT 发布端。
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    /// 建立客户端并在后台驱动事件循环。
    pub fn connect(connection: &MqttConnection, qos: u8) -> (Self, tokio::task::JoinHandle<()>) {
        let (client, mut eventloop) = AsyncClient::new(connection.options("mbgw-publish"), 64);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "mbgw.bus", "mqtt publish eventloop error: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        (
            Self {
                client,
                qos: qos_from_u8(qos),
            },
            handle,
        )
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| BusError::Publish(err.to_string()))
    }
}

pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
