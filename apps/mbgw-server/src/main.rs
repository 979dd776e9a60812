//! Modbus 网关进程：网关接入端口、插件 HTTP 接口与 MQTT 收发。

mod forms;
mod handlers;
mod middleware;
mod routes;
mod utils;

use forms::FormStore;
use mbgw_auth::{AuthLimiter, AuthLimiterConfig};
use mbgw_bus::{BusTopics, DeviceBus, MqttConnection, MqttPublisher};
use mbgw_config::AppConfig;
use mbgw_control::{ControlListenerConfig, spawn_control_listener};
use mbgw_platform::{HttpPlatformClient, PlatformClient, spawn_heartbeat};
use mbgw_session::{CycleTimeouts, GatewayRuntime, RetryPolicy, SessionControl, SessionSettings};
use mbgw_telemetry::init_tracing;
use std::future::IntoFuture;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<GatewayRuntime>,
    pub forms: Arc<FormStore>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // MQTT 发布端：遥测、状态与异常上报
    let mqtt = MqttConnection {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
    };
    let (publisher, _publisher_loop) = MqttPublisher::connect(&mqtt, config.mqtt_qos);
    let bus = DeviceBus::new(
        Arc::new(publisher),
        BusTopics {
            telemetry: config.mqtt_telemetry_topic.clone(),
            status: config.mqtt_status_topic.clone(),
        },
    );

    let platform: Arc<dyn PlatformClient> = Arc::new(HttpPlatformClient::new(
        config.platform_url.clone(),
        Duration::from_millis(config.platform_timeout_ms),
    )?);
    let limiter = AuthLimiter::new(AuthLimiterConfig {
        enabled: config.auth_limiter_enabled,
        failure_threshold: config.auth_max_failures,
        block_duration: Duration::from_secs(config.auth_block_seconds),
        log_throttle: Duration::from_secs(config.auth_log_throttle_seconds),
    });
    let runtime = Arc::new(GatewayRuntime::new(
        bus,
        platform.clone(),
        limiter,
        session_settings(&config),
    ));

    // 后台任务：服务心跳、控制订阅
    spawn_heartbeat(
        platform,
        config.service_identifier.clone(),
        Duration::from_secs(config.heartbeat_interval_seconds),
    );
    spawn_control_listener(
        ControlListenerConfig {
            connection: mqtt,
            topic: config.mqtt_control_topic.clone(),
            qos: config.mqtt_qos,
        },
        Arc::new(SessionControl::new(runtime.clone())),
    );

    let state = AppState {
        runtime: runtime.clone(),
        forms: Arc::new(FormStore::load(Path::new(&config.form_dir))),
    };

    let gateway_listener = TcpListener::bind(&config.server_addr).await?;
    let gateway = tokio::spawn(mbgw_session::serve(gateway_listener, runtime));
    let http_listener = TcpListener::bind(&config.http_addr).await?;
    info!(target: "mbgw.http", addr = %config.http_addr, "http_listener_started");

    tokio::select! {
        result = axum::serve(http_listener, routes::create_router(state)).into_future() => result?,
        result = gateway => result??,
    }
    Ok(())
}

fn session_settings(config: &AppConfig) -> SessionSettings {
    SessionSettings {
        poll_timeouts: CycleTimeouts {
            write: Duration::from_millis(config.write_timeout_ms),
            read: Duration::from_millis(config.read_timeout_ms),
        },
        control_timeouts: CycleTimeouts {
            write: Duration::from_millis(config.control_write_timeout_ms),
            read: Duration::from_millis(config.control_read_timeout_ms),
        },
        retry: RetryPolicy {
            enabled: config.retry_enabled,
            max_retries: config.retry_max_retries,
            interval: Duration::from_millis(config.retry_interval_ms),
            multiplier: config.retry_backoff_multiplier,
        },
        flush_silence: config
            .flush_enabled
            .then(|| Duration::from_millis(config.flush_silence_ms)),
        strict_crc: config.strict_crc,
        ..SessionSettings::default()
    }
}
