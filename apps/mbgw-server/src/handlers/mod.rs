//! Handlers 模块

pub mod device_config;
pub mod form;
pub mod metrics;

pub use device_config::*;
pub use form::*;
pub use metrics::*;

use axum::{Json, response::IntoResponse};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}
