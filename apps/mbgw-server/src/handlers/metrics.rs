//! 运行指标快照。
//!
//! - GET /api/metrics

use api_contract::{MetricsSnapshotDto, PluginResponse};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mbgw_telemetry::metrics;

pub async fn get_metrics() -> Response {
    let snapshot = metrics().snapshot();
    let avg_cycle_latency_ms = snapshot
        .cycle_latency_ms_total
        .checked_div(snapshot.cycle_latency_ms_count)
        .unwrap_or(0);
    (
        StatusCode::OK,
        Json(PluginResponse::success(MetricsSnapshotDto {
            connections_accepted: snapshot.connections_accepted,
            connections_blocked: snapshot.connections_blocked,
            registrations_ok: snapshot.registrations_ok,
            registrations_failed: snapshot.registrations_failed,
            polls_ok: snapshot.polls_ok,
            poll_timeouts: snapshot.poll_timeouts,
            modbus_exceptions: snapshot.modbus_exceptions,
            telemetry_published: snapshot.telemetry_published,
            publish_failures: snapshot.publish_failures,
            sessions_closed: snapshot.sessions_closed,
            control_writes_ok: snapshot.control_writes_ok,
            control_writes_failed: snapshot.control_writes_failed,
            avg_cycle_latency_ms,
        })),
    )
        .into_response()
}
