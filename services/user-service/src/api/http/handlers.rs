//! 用户接口处理器

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::{JsonRejection, QueryRejection}},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use userhub_bootstrap::HealthChecker;
use userhub_common::{PaginationMeta, PaginationParams, SortParams, parse_filters, parse_sorts};
use userhub_ports::CachePort;

use super::response::{ApiError, PaginatedResponse, respond};
use crate::application::{CreateUserRequest, UpdateUserRequest, UserUsecase};
use crate::domain::{FILTER_COLUMNS, SORT_COLUMNS};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub usecase: Arc<dyn UserUsecase>,
    pub cache: Arc<dyn CachePort>,
    pub health: HealthChecker,
    pub metrics: Option<PrometheusHandle>,
    pub cache_ttl: Duration,
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|e| ApiError::bad_request("Invalid user ID", e))
}

pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request("Invalid request body", e.body_text()))?;
    request
        .validate()
        .map_err(|e| ApiError::bad_request("Invalid request body", e.message()))?;

    let user = state
        .usecase
        .create_user(request)
        .await
        .map_err(|e| ApiError::from_app(e, "Failed to create user"))?;

    Ok(respond(StatusCode::CREATED, "User created successfully", Some(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;

    let user = state.usecase.get_user(id).await.map_err(|e| {
        let message = if e.is_not_found() {
            "User not found"
        } else {
            "Failed to get user"
        };
        ApiError::from_app(e, message)
    })?;

    Ok(respond(StatusCode::OK, "User retrieved successfully", Some(user)))
}

pub async fn list_users(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::bad_request("Invalid query parameters", e.body_text()))?;
    let first = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let pagination = PaginationParams::parse(first("page"), first("limit"));
    let sorts = parse_sorts(first("sort"), SORT_COLUMNS, &[SortParams::desc("created_at")])
        .map_err(|e| ApiError::bad_request("Invalid sort parameters", e))?;
    let filter_keys: Vec<&str> = FILTER_COLUMNS.iter().map(|(key, _)| *key).collect();
    let filters = parse_filters(&query, &filter_keys, &["sort"])
        .map_err(|e| ApiError::bad_request("Invalid query parameters", e))?;

    let page = state
        .usecase
        .list_users(pagination, filters, sorts)
        .await
        .map_err(|e| ApiError::from_app(e, "Failed to get users"))?;

    let meta = PaginationMeta::calculate(pagination.page, pagination.limit, page.total);
    Ok(PaginatedResponse::new(page.users, meta).into_response())
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let Json(request) = body.map_err(|e| ApiError::bad_request("Invalid request body", e.body_text()))?;
    request
        .validate()
        .map_err(|e| ApiError::bad_request("Invalid request body", e.message()))?;

    let user = state
        .usecase
        .update_user(id, request)
        .await
        .map_err(|e| ApiError::from_app(e, "Failed to update user"))?;

    Ok(respond(StatusCode::OK, "User updated successfully", Some(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;

    state
        .usecase
        .delete_user(id)
        .await
        .map_err(|e| ApiError::from_app(e, "Failed to delete user"))?;

    Ok(respond::<()>(StatusCode::OK, "User deleted successfully", None))
}

pub async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    let status = state.health.check().await.map_err(|failure| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, failure.message).with_error(failure.cause)
    })?;

    Ok(respond(StatusCode::OK, "Service is healthy", Some(status)))
}

/// Prometheus 文本格式指标
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn fallback() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "you are lost")
}
