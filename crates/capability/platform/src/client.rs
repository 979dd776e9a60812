use crate::{PlatformClient, PlatformError};
use async_trait::async_trait;
use domain::PlatformDeviceConfig;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEVICE_CONFIG_PATH: &str = "/api/v1/plugin/device/config";
const HEARTBEAT_PATH: &str = "/api/v1/plugin/heartbeat";

#[derive(Debug, Serialize)]
struct DeviceConfigRequest<'a> {
    voucher: String,
    device_id: &'a str,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    service_identifier: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// 基于 reqwest 的平台客户端。
#[derive(Clone)]
pub struct HttpPlatformClient {
    client: Client,
    base_url: String,
}

impl HttpPlatformClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PlatformError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Envelope<T>, PlatformError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(target: "mbgw.platform", url = %url, status = status.as_u16(), "platform_response");
        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|err| PlatformError::Parse(err.to_string()))?;
        if envelope.code != 200 {
            return Err(PlatformError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope)
    }

    async fn device_config(&self, voucher: String, device_id: &str) -> Result<PlatformDeviceConfig, PlatformError> {
        let request = DeviceConfigRequest { voucher, device_id };
        let envelope: Envelope<PlatformDeviceConfig> = self.post(DEVICE_CONFIG_PATH, &request).await?;
        let config = envelope
            .data
            .ok_or_else(|| PlatformError::Parse("missing data".to_string()))?;
        info!(
            target: "mbgw.platform",
            gateway_id = %config.id,
            protocol_type = %config.protocol_type,
            sub_devices = config.sub_devices.len(),
            "device_config_resolved"
        );
        Ok(config)
    }
}

/// 凭证按 `{"reg_pkg": "<credential>"}` 包装。
pub(crate) fn wrap_credential(credential: &str) -> String {
    serde_json::json!({ "reg_pkg": credential }).to_string()
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn resolve_by_credential(&self, credential: &str) -> Result<PlatformDeviceConfig, PlatformError> {
        self.device_config(wrap_credential(credential), "").await
    }

    async fn resolve_by_gateway_id(&self, gateway_id: &str) -> Result<PlatformDeviceConfig, PlatformError> {
        self.device_config(String::new(), gateway_id).await
    }

    async fn heartbeat(&self, service_identifier: &str) -> Result<(), PlatformError> {
        let request = HeartbeatRequest { service_identifier };
        let _: Envelope<serde_json::Value> = self.post(HEARTBEAT_PATH, &request).await?;
        Ok(())
    }
}
