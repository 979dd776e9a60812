//! 网关进程运行配置加载（`MBGW_*` 环境变量）。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关进程运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub platform_url: String,
    pub server_addr: String,
    pub http_addr: String,
    pub service_identifier: String,
    pub heartbeat_interval_seconds: u64,
    pub platform_timeout_ms: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_telemetry_topic: String,
    pub mqtt_status_topic: String,
    pub mqtt_control_topic: String,
    pub mqtt_qos: u8,
    pub auth_limiter_enabled: bool,
    pub auth_max_failures: u32,
    pub auth_block_seconds: u64,
    pub auth_log_throttle_seconds: u64,
    pub retry_enabled: bool,
    pub retry_max_retries: u32,
    pub retry_interval_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub flush_enabled: bool,
    pub flush_silence_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub control_read_timeout_ms: u64,
    pub control_write_timeout_ms: u64,
    pub strict_crc: bool,
    pub form_dir: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let platform_url = read_optional("MBGW_PLATFORM_URL")
            .ok_or_else(|| ConfigError::Missing("MBGW_PLATFORM_URL".to_string()))?;
        let server_addr = env::var("MBGW_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:502".to_string());
        let http_addr = env::var("MBGW_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:503".to_string());
        let service_identifier =
            env::var("MBGW_SERVICE_IDENTIFIER").unwrap_or_else(|_| "MODBUS".to_string());
        let heartbeat_interval_seconds =
            read_u64_with_default("MBGW_HEARTBEAT_INTERVAL_SECONDS", 50)?.max(1);
        let platform_timeout_ms = read_u64_with_default("MBGW_PLATFORM_TIMEOUT_MS", 5000)?;
        let mqtt_host = env::var("MBGW_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("MBGW_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("MBGW_MQTT_USERNAME");
        let mqtt_password = read_optional("MBGW_MQTT_PASSWORD");
        let mqtt_telemetry_topic =
            env::var("MBGW_MQTT_TELEMETRY_TOPIC").unwrap_or_else(|_| "devices/telemetry".to_string());
        let mqtt_status_topic =
            env::var("MBGW_MQTT_STATUS_TOPIC").unwrap_or_else(|_| "devices/status".to_string());
        let mqtt_control_topic = env::var("MBGW_MQTT_CONTROL_TOPIC")
            .unwrap_or_else(|_| "plugin/modbus/devices/telemetry/control/#".to_string());
        let mqtt_qos = read_u8_with_default("MBGW_MQTT_QOS", 1)?;
        if mqtt_qos > 2 {
            return Err(ConfigError::Invalid(
                "MBGW_MQTT_QOS".to_string(),
                mqtt_qos.to_string(),
            ));
        }
        let auth_limiter_enabled = read_bool_with_default("MBGW_AUTH_LIMITER_ENABLED", true);
        let auth_max_failures = read_u32_with_default("MBGW_AUTH_MAX_FAILURES", 3)?.max(1);
        let auth_block_seconds = read_u64_with_default("MBGW_AUTH_BLOCK_SECONDS", 180)?;
        let auth_log_throttle_seconds = read_u64_with_default("MBGW_AUTH_LOG_THROTTLE_SECONDS", 60)?;
        let retry_enabled = read_bool_with_default("MBGW_RETRY_ENABLED", true);
        let retry_max_retries = read_u32_with_default("MBGW_RETRY_MAX_RETRIES", 2)?;
        let retry_interval_ms = read_u64_with_default("MBGW_RETRY_INTERVAL_MS", 500)?;
        let retry_backoff_multiplier = read_f64_with_default("MBGW_RETRY_BACKOFF_MULTIPLIER", 2.0)?;
        let flush_enabled = read_bool_with_default("MBGW_FLUSH_ENABLED", true);
        let flush_silence_ms = read_u64_with_default("MBGW_FLUSH_SILENCE_MS", 100)?;
        let read_timeout_ms = read_u64_with_default("MBGW_READ_TIMEOUT_MS", 1000)?;
        let write_timeout_ms = read_u64_with_default("MBGW_WRITE_TIMEOUT_MS", 1000)?;
        let control_read_timeout_ms = read_u64_with_default("MBGW_CONTROL_READ_TIMEOUT_MS", 3000)?;
        let control_write_timeout_ms =
            read_u64_with_default("MBGW_CONTROL_WRITE_TIMEOUT_MS", 15000)?;
        let strict_crc = read_bool_with_default("MBGW_STRICT_CRC", false);
        let form_dir = env::var("MBGW_FORM_DIR").unwrap_or_else(|_| ".".to_string());

        Ok(Self {
            platform_url,
            server_addr,
            http_addr,
            service_identifier,
            heartbeat_interval_seconds,
            platform_timeout_ms,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_telemetry_topic,
            mqtt_status_topic,
            mqtt_control_topic,
            mqtt_qos,
            auth_limiter_enabled,
            auth_max_failures,
            auth_block_seconds,
            auth_log_throttle_seconds,
            retry_enabled,
            retry_max_retries,
            retry_interval_ms,
            retry_backoff_multiplier,
            flush_enabled,
            flush_silence_ms,
            read_timeout_ms,
            write_timeout_ms,
            control_read_timeout_ms,
            control_write_timeout_ms,
            strict_crc,
            form_dir,
        })
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    read_parsed(key, default)
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    read_parsed(key, default)
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    read_parsed(key, default)
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    read_parsed(key, default)
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value: f64 = read_parsed(key, default)?;
    if !value.is_finite() || value < 1.0 {
        return Err(ConfigError::Invalid(key.to_string(), value.to_string()));
    }
    Ok(value)
}

fn read_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    let value = match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
