use crate::SessionError;
use crate::poller::spawn_poller;
use crate::registry::ConnectionRegistry;
use crate::reporter::exception_report;
use crate::retry::RetryPolicy;
use crate::session::{CycleFailure, CycleTimeouts, GatewaySession};
use crate::transport::Transport;
use async_trait::async_trait;
use domain::{DeviceStatus, GatewayConfig};
use mbgw_auth::AuthLimiter;
use mbgw_bus::DeviceBus;
use mbgw_control::{ControlError, ControlExecutor, ControlWrite};
use mbgw_platform::PlatformClient;
use mbgw_protocol::{ErrorKind, plan_write};
use mbgw_telemetry::{
    record_control_write_failed, record_control_write_ok, record_modbus_exception,
    record_session_closed,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// 会话运行参数。
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_timeouts: CycleTimeouts,
    pub control_timeouts: CycleTimeouts,
    pub retry: RetryPolicy,
    /// 超时后的静默等待；None 表示不做排空
    pub flush_silence: Option<Duration>,
    pub strict_crc: bool,
    /// 等待注册凭证的期限
    pub registration_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_timeouts: CycleTimeouts {
                write: Duration::from_secs(1),
                read: Duration::from_secs(1),
            },
            control_timeouts: CycleTimeouts {
                write: Duration::from_secs(15),
                read: Duration::from_secs(3),
            },
            retry: RetryPolicy::default(),
            flush_silence: Some(Duration::from_millis(100)),
            strict_crc: false,
            registration_timeout: Duration::from_secs(30),
        }
    }
}

/// 网关会话的生命周期管理：注册、关闭、重配置与控制写入。
pub struct GatewayRuntime {
    registry: ConnectionRegistry,
    bus: DeviceBus,
    platform: Arc<dyn PlatformClient>,
    limiter: AuthLimiter,
    settings: SessionSettings,
    next_conn_id: AtomicU64,
}

impl GatewayRuntime {
    pub fn new(
        bus: DeviceBus,
        platform: Arc<dyn PlatformClient>,
        limiter: AuthLimiter,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            bus,
            platform,
            limiter,
            settings,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &DeviceBus {
        &self.bus
    }

    pub fn limiter(&self) -> &AuthLimiter {
        &self.limiter
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// 凭证 → 配置 → 安装会话 → 上线状态 → 启动采集。
    pub async fn register(
        self: &Arc<Self>,
        credential: &str,
        peer: &str,
        transport: Box<dyn Transport>,
    ) -> Result<Arc<GatewaySession>, SessionError> {
        let raw = self.platform.resolve_by_credential(credential).await?;
        let config = GatewayConfig::from_platform(raw)?;
        for rejected in &config.rejected {
            warn!(
                target: "mbgw.session",
                gateway_id = %config.gateway_id,
                reason = %rejected,
                "register_command_skipped"
            );
        }

        let session = Arc::new(GatewaySession::new(
            self.next_conn_id.fetch_add(1, Ordering::Relaxed),
            config,
            credential.to_string(),
            peer.to_string(),
            transport,
            self.settings.strict_crc,
            self.settings.flush_silence,
        ));
        if let Some(previous) = self.registry.put(session.clone()) {
            info!(
                target: "mbgw.session",
                gateway_id = %previous.gateway_id(),
                conn_id = previous.conn_id(),
                "session_replaced"
            );
            previous.shutdown().await;
        }

        if let Err(err) = self
            .bus
            .publish_status(session.gateway_id(), DeviceStatus::Online)
            .await
        {
            warn!(target: "mbgw.session", gateway_id = %session.gateway_id(), error = %err, "status_publish_failed");
        }

        let mut pollers = 0;
        for sub in &session.config().sub_devices {
            for index in 0..sub.commands.len() {
                let handle = spawn_poller(self.clone(), session.clone(), sub.device_id.clone(), index);
                session.track_poller(handle.abort_handle());
                pollers += 1;
            }
        }
        info!(
            target: "mbgw.session",
            gateway_id = %session.gateway_id(),
            conn_id = session.conn_id(),
            peer = %peer,
            variant = session.config().variant.as_str(),
            sub_devices = session.config().sub_devices.len(),
            pollers,
            "session_online"
        );
        Ok(session)
    }

    /// 关闭会话；真正从注册表移除它的那次调用负责发布离线状态。
    pub async fn close_session(&self, session: &Arc<GatewaySession>) -> bool {
        let removed = self
            .registry
            .compare_and_remove(session.gateway_id(), session.conn_id())
            .is_some();
        let closed = session.shutdown().await;
        if removed {
            record_session_closed();
            if let Err(err) = self
                .bus
                .publish_status(session.gateway_id(), DeviceStatus::Offline)
                .await
            {
                warn!(target: "mbgw.session", gateway_id = %session.gateway_id(), error = %err, "status_publish_failed");
            }
            info!(
                target: "mbgw.session",
                gateway_id = %session.gateway_id(),
                conn_id = session.conn_id(),
                "session_offline"
            );
        }
        removed || closed
    }

    /// 在后台关闭会话（供会话自己的任务调用）。
    pub(crate) fn close_in_background(self: &Arc<Self>, session: Arc<GatewaySession>) {
        let runtime = self.clone();
        tokio::spawn(async move {
            runtime.close_session(&session).await;
        });
    }

    /// 重配置：确认平台上配置有效，然后关闭在线会话，等设备重连后按新配置注册。
    pub async fn reconfigure(&self, gateway_id: &str) -> Result<(), SessionError> {
        let raw = self.platform.resolve_by_gateway_id(gateway_id).await?;
        let config = GatewayConfig::from_platform(raw)?;
        let session = self
            .registry
            .get(gateway_id)
            .ok_or_else(|| SessionError::NotConnected(gateway_id.to_string()))?;
        info!(
            target: "mbgw.session",
            gateway_id = %gateway_id,
            sub_devices = config.sub_devices.len(),
            "session_reconfigure"
        );
        self.close_session(&session).await;
        Ok(())
    }

    /// 上报失败周期；链路故障不上报。
    pub(crate) async fn report_failure(&self, device_id: &str, failure: &CycleFailure) {
        match failure.error.kind {
            ErrorKind::Connection => return,
            ErrorKind::Business => record_modbus_exception(),
            _ => {}
        }
        let report = exception_report(failure);
        if let Err(err) = self.bus.publish_exception(device_id, &report).await {
            warn!(target: "mbgw.session", device_id = %device_id, error = %err, "exception_report_failed");
        }
    }
}

/// 控制写入执行器：找到子设备所在会话，按采集命令编码写请求并走同一把传输锁。
#[derive(Clone)]
pub struct SessionControl {
    runtime: Arc<GatewayRuntime>,
}

impl SessionControl {
    pub fn new(runtime: Arc<GatewayRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ControlExecutor for SessionControl {
    async fn execute(&self, write: &ControlWrite) -> Result<(), ControlError> {
        let runtime = &self.runtime;
        let session = runtime
            .registry
            .find_by_sub_device(&write.device_id)
            .ok_or_else(|| ControlError::Offline(write.device_id.clone()))?;
        let sub = session
            .config()
            .sub_device(&write.device_id)
            .ok_or_else(|| ControlError::UnknownDevice(write.device_id.clone()))?;
        let (command, index) = sub.locate(&write.key).ok_or_else(|| ControlError::UnknownKey {
            device_id: write.device_id.clone(),
            key: write.key.clone(),
        })?;
        let request = plan_write(command, sub.slave_id, index, write.value).map_err(|err| {
            record_control_write_failed();
            ControlError::Write(err.to_string())
        })?;

        match session
            .request(&request, runtime.settings.control_timeouts, &RetryPolicy::disabled())
            .await
        {
            Ok(_) => {
                record_control_write_ok();
                Ok(())
            }
            Err(failure) => {
                record_control_write_failed();
                if failure.error.closes_connection() {
                    runtime.close_in_background(session.clone());
                }
                runtime.report_failure(&write.device_id, &failure).await;
                Err(ControlError::Write(failure.error.to_string()))
            }
        }
    }
}
