//! 插件 HTTP 接口的 DTO 与响应契约。

use serde::{Deserialize, Serialize};

/// 平台约定的成功码。
pub const CODE_OK: i64 = 200;
/// 请求参数或业务错误。
pub const CODE_BAD_REQUEST: i64 = 400;

/// 插件接口统一响应封装：`{"code":200,"message":"success","data":...}`。
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PluginResponse<T> {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> PluginResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: CODE_OK,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: CODE_BAD_REQUEST,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }
}

impl PluginResponse<serde_json::Value> {
    /// 成功且 `data` 显式为 null。
    pub fn success_null() -> Self {
        Self::success(serde_json::Value::Null)
    }
}

/// 设备配置变更通知（平台推送，字段为 PascalCase）。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceNotification {
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl DeviceNotification {
    /// 子设备的设备类型。
    pub const SUB_DEVICE: &'static str = "3";

    pub fn is_sub_device(&self) -> bool {
        self.device_type.trim() == Self::SUB_DEVICE
    }
}

/// 表单配置查询参数。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FormQuery {
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub form_type: String,
    #[serde(default)]
    pub protocol_type: String,
}

/// `GET /api/metrics` 返回结构。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshotDto {
    pub connections_accepted: u64,
    pub connections_blocked: u64,
    pub registrations_ok: u64,
    pub registrations_failed: u64,
    pub polls_ok: u64,
    pub poll_timeouts: u64,
    pub modbus_exceptions: u64,
    pub telemetry_published: u64,
    pub publish_failures: u64,
    pub sessions_closed: u64,
    pub control_writes_ok: u64,
    pub control_writes_failed: u64,
    /// 平均单次收发耗时（毫秒）
    pub avg_cycle_latency_ms: u64,
}
