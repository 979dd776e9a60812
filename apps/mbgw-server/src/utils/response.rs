//! HTTP 响应辅助函数
//!
//! 插件接口统一使用 `PluginResponse` 封装，失败时 HTTP 状态码为 400。

use api_contract::PluginResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;

/// 成功响应，无 data
pub fn ok_empty() -> Response {
    (
        StatusCode::OK,
        Json(PluginResponse::<Value> {
            code: api_contract::CODE_OK,
            message: "success".to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// 成功响应，data 可为 null
pub fn ok_data(data: Option<Value>) -> Response {
    let body = match data {
        Some(data) => PluginResponse::success(data),
        None => PluginResponse::success_null(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// 错误请求响应
pub fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(PluginResponse::<Value>::bad_request(message)),
    )
        .into_response()
}
