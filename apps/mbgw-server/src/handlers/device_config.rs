//! 设备配置变更通知
//!
//! - POST /api/v1/device/config/create
//! - POST /api/v1/device/config/update
//! - POST /api/v1/device/config/delete（仅子设备触发重配置）

use api_contract::DeviceNotification;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::Response,
};
use tracing::{info, warn};

use crate::AppState;
use crate::utils::response::{bad_request, ok_empty};

pub async fn device_created(
    State(state): State<AppState>,
    body: Result<Json<DeviceNotification>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(notification)) => reconfigure(&state, &notification, "create").await,
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

pub async fn device_updated(
    State(state): State<AppState>,
    body: Result<Json<DeviceNotification>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(notification)) => reconfigure(&state, &notification, "update").await,
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

pub async fn device_deleted(
    State(state): State<AppState>,
    body: Result<Json<DeviceNotification>, JsonRejection>,
) -> Response {
    let notification = match body {
        Ok(Json(notification)) => notification,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    // 只有子设备删除需要重配置
    if !notification.is_sub_device() {
        return ok_empty();
    }
    reconfigure(&state, &notification, "delete").await
}

async fn reconfigure(state: &AppState, notification: &DeviceNotification, action: &str) -> Response {
    let gateway_id = notification.parent_id.trim();
    if gateway_id.is_empty() {
        return bad_request("ParentId is required");
    }
    match state.runtime.reconfigure(gateway_id).await {
        Ok(()) => {
            info!(target: "mbgw.http", gateway_id = %gateway_id, action = %action, "gateway_reconfigured");
            ok_empty()
        }
        Err(err) => {
            warn!(
                target: "mbgw.http",
                gateway_id = %gateway_id,
                action = %action,
                error = %err,
                "gateway_reconfigure_failed"
            );
            bad_request(err.to_string())
        }
    }
}
