//! 路由定义
//!
//! - 健康检查：/health
//! - 运行指标：/api/metrics
//! - 设备配置通知：/api/v1/device/config/{create,update,delete}
//! - 插件表单：/api/v1/form/config

use super::AppState;
use super::handlers::*;
use super::middleware::request_context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/metrics", get(get_metrics))
        .route("/api/v1/device/config/create", post(device_created))
        .route("/api/v1/device/config/update", post(device_updated))
        .route("/api/v1/device/config/delete", post(device_deleted))
        .route("/api/v1/form/config", get(get_form))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
}
