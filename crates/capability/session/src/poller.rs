use crate::runtime::GatewayRuntime;
use crate::session::{CycleFailure, GatewaySession};
use mbgw_protocol::{Classify, ModbusRequest, decode_values};
use mbgw_telemetry::record_poll_ok;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// 为一个 (子设备, 命令) 启动采集循环。
///
/// 超时与业务异常只上报，循环继续；链路故障时触发会话关闭并退出。
pub(crate) fn spawn_poller(
    runtime: Arc<GatewayRuntime>,
    session: Arc<GatewaySession>,
    device_id: String,
    command_index: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(sub) = session.config().sub_device(&device_id) else {
            return;
        };
        let Some(command) = sub.commands.get(command_index) else {
            return;
        };
        let request = ModbusRequest::read(
            sub.slave_id,
            command.function_code,
            command.starting_address,
            command.quantity,
        );
        let settings = runtime.settings();
        let mut ticker = interval(command.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            target: "mbgw.session",
            gateway_id = %session.gateway_id(),
            device_id = %device_id,
            function_code = command.function_code,
            address = command.starting_address,
            quantity = command.quantity,
            interval_secs = command.interval.as_secs(),
            "poller_started"
        );

        loop {
            ticker.tick().await;
            if session.is_closed() {
                break;
            }

            let reply = match session
                .request(&request, settings.poll_timeouts, &settings.retry)
                .await
            {
                Ok(reply) => reply,
                Err(failure) => {
                    if failure.error.closes_connection() {
                        info!(
                            target: "mbgw.session",
                            gateway_id = %session.gateway_id(),
                            device_id = %device_id,
                            error = %failure.error,
                            "poller_connection_lost"
                        );
                        runtime.close_in_background(session.clone());
                        break;
                    }
                    warn!(
                        target: "mbgw.session",
                        gateway_id = %session.gateway_id(),
                        device_id = %device_id,
                        kind = %failure.error.kind,
                        error = %failure.error.message,
                        "poll_failed"
                    );
                    runtime.report_failure(&device_id, &failure).await;
                    continue;
                }
            };

            match decode_values(command, &reply.pdu) {
                Ok(values) => {
                    record_poll_ok();
                    if let Err(err) = runtime.bus().publish_telemetry(&device_id, &values).await {
                        warn!(
                            target: "mbgw.session",
                            device_id = %device_id,
                            error = %err,
                            "telemetry_publish_failed"
                        );
                    }
                }
                Err(err) => {
                    let failure = CycleFailure {
                        error: err.into_classified(),
                        request: reply.request,
                        response: reply.response,
                    };
                    warn!(
                        target: "mbgw.session",
                        device_id = %device_id,
                        kind = %failure.error.kind,
                        error = %failure.error.message,
                        "decode_failed"
                    );
                    runtime.report_failure(&device_id, &failure).await;
                }
            }
        }
    })
}
