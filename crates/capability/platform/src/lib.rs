//! 平台协作方：注册凭证 / 网关 id → 设备配置，以及服务心跳。

mod client;
mod heartbeat;

use async_trait::async_trait;
use domain::PlatformDeviceConfig;
use std::collections::HashMap;
use std::sync::Mutex;

pub use client::HttpPlatformClient;
pub use heartbeat::spawn_heartbeat;

/// 平台调用错误。
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform error: {code} - {message}")]
    Api { code: i64, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("device config not found: {0}")]
    NotFound(String),
}

/// 平台接口。
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// 用设备首包注册凭证换取网关配置。
    async fn resolve_by_credential(&self, credential: &str) -> Result<PlatformDeviceConfig, PlatformError>;

    /// 按网关 id 重新拉取配置（重配置时使用）。
    async fn resolve_by_gateway_id(&self, gateway_id: &str) -> Result<PlatformDeviceConfig, PlatformError>;

    /// 上报服务心跳。
    async fn heartbeat(&self, service_identifier: &str) -> Result<(), PlatformError>;
}

/// 固定配置表（本地联调与测试）。
#[derive(Debug, Default)]
pub struct StaticPlatformClient {
    by_credential: HashMap<String, PlatformDeviceConfig>,
    by_gateway: HashMap<String, PlatformDeviceConfig>,
    heartbeats: Mutex<Vec<String>>,
}

impl StaticPlatformClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个网关，凭证与网关 id 都能查到它。
    pub fn with_gateway(mut self, credential: &str, config: PlatformDeviceConfig) -> Self {
        self.by_gateway.insert(config.id.clone(), config.clone());
        self.by_credential.insert(credential.to_string(), config);
        self
    }

    pub fn heartbeats(&self) -> Vec<String> {
        self.heartbeats
            .lock()
            .map(|beats| beats.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlatformClient for StaticPlatformClient {
    async fn resolve_by_credential(&self, credential: &str) -> Result<PlatformDeviceConfig, PlatformError> {
        self.by_credential
            .get(credential)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(credential.to_string()))
    }

    async fn resolve_by_gateway_id(&self, gateway_id: &str) -> Result<PlatformDeviceConfig, PlatformError> {
        self.by_gateway
            .get(gateway_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(gateway_id.to_string()))
    }

    async fn heartbeat(&self, service_identifier: &str) -> Result<(), PlatformError> {
        if let Ok(mut beats) = self.heartbeats.lock() {
            beats.push(service_identifier.to_string());
        }
        Ok(())
    }
}
