//! 网关领域模型：平台下发的网关配置与采集值。

pub mod config;
pub mod data;

pub use config::{
    ByteOrder, DataType, DomainConfigError, GatewayConfig, PlatformDeviceConfig,
    PlatformSubDevice, ProtocolVariant, RegisterCommand, SubDeviceDescriptor,
};
pub use data::{DeviceStatus, ValueMap};
