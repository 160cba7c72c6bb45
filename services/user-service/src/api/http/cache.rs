//! 响应缓存中间件
//!
//! 只缓存 GET。key 为 `cache:{请求路径}`，查询串不参与，这样更新和删除时按路径失效
//! 就能覆盖所有变体。命中时直接返回缓存内容并带 `X-Cache: HIT`；
//! 未命中时执行处理器，200 响应写回缓存。

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderName, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use super::handlers::AppState;
use super::response::ApiError;
use crate::application::cache_key;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub async fn cache_response(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache_key(request.uri().path());

    match state.cache.get(&key).await {
        Ok(Some(cached)) => {
            debug!(key = %key, "Cache hit");
            return (
                [(header::CONTENT_TYPE, "application/json"), (X_CACHE, "HIT")],
                cached,
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "Cache lookup failed"),
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(key = %key, error = %e, "Failed to read response body");
            return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };

    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            if let Err(e) = state.cache.set(&key, text, Some(state.cache_ttl)).await {
                error!(key = %key, error = %e, "Failed to cache response");
            }
        }
        Err(_) => warn!(key = %key, "Response body is not UTF-8, not cached"),
    }

    Response::from_parts(parts, Body::from(bytes))
}
