//! 请求级 trace 上下文
//!
//! 读取入站 `traceparent`（没有或不合法时新建根上下文），放进请求扩展和 task-local，
//! 并在响应中回写。

use std::any::Any;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{Span, error, info_span};
use userhub_telemetry::{TRACEPARENT_HEADER, TraceContext, with_trace};

use super::response::ApiError;

pub async fn propagate_trace(mut request: Request, next: Next) -> Response {
    let trace = request
        .headers()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(TraceContext::parse)
        .map(|parent| parent.child())
        .unwrap_or_else(TraceContext::new_root);

    request.extensions_mut().insert(trace.clone());
    let mut response = with_trace(trace.clone(), next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
        response.headers_mut().insert(TRACEPARENT_HEADER, value);
    }
    response
}

/// 请求日志 span，带 trace_id
pub fn make_request_span(request: &axum::http::Request<Body>) -> Span {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|t| t.trace_id.as_str())
        .unwrap_or("");

    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        trace_id = %trace_id,
    )
}

/// panic 转为 500 响应
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "Panic recovered");

    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}
