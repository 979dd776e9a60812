//! 请求上下文中间件：生成 request_id/trace_id，写入日志 span 与响应头。

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response as HttpResponse},
    middleware::Next,
    response::Response,
};
use mbgw_telemetry::{RequestIds, new_request_ids};
use std::time::Instant;
use tracing::{Instrument, info};

pub async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let ids = new_request_ids();
    let span = tracing::info_span!(
        target: "mbgw.http",
        "http_request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    req.extensions_mut().insert(ids.clone());

    let started = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(
            target: "mbgw.http",
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http_request_done"
        )
    });
    attach_ids(&mut response, &ids);
    response
}

fn attach_ids(response: &mut HttpResponse<Body>, ids: &RequestIds) {
    for (name, value) in [("x-request-id", &ids.request_id), ("x-trace-id", &ids.trace_id)] {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(name, value);
        }
    }
}
