//! 统一响应包络
//!
//! `{success, message?, data?, error?}`；分页响应额外带 `pagination`。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use userhub_common::PaginationMeta;
use userhub_errors::{AppError, ErrorKind};

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data,
            error: None,
        }
    }
}

/// 成功响应
pub fn respond<T: Serialize>(status: StatusCode, message: &str, data: Option<T>) -> Response {
    (status, Json(ApiResponse::success(message, data))).into_response()
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T: Serialize> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, pagination: PaginationMeta) -> Self {
        Self {
            success: true,
            data,
            pagination,
        }
    }
}

impl<T: Serialize> IntoResponse for PaginatedResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// 失败响应
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
        }
    }

    pub fn bad_request(message: impl Into<String>, error: impl ToString) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message).with_error(error)
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// 业务错误：状态码由错误种类决定，内部错误的细节只写日志
    pub fn from_app(err: AppError, message: impl Into<String>) -> Self {
        let message = message.into();
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => {
                error!(error = %err, "{}", message);
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
                    .with_error("internal server error");
            }
        };
        Self::new(status, message).with_error(err.message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            message: Some(self.message),
            data: None,
            error: self.error,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::<()>::success("User deleted successfully", None))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "message": "User deleted successfully"})
        );
    }

    #[test]
    fn test_error_status_follows_kind() {
        let cases = [
            (AppError::validation("bad"), StatusCode::BAD_REQUEST),
            (AppError::conflict("email already exists"), StatusCode::CONFLICT),
            (AppError::not_found("user not found"), StatusCode::NOT_FOUND),
            (AppError::database("pool closed"), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::unavailable("redis"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from_app(err, "Failed").status, status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ApiError::from_app(AppError::database("password=hunter2"), "Failed to create user");
        assert_eq!(err.error.as_deref(), Some("internal server error"));

        let err = ApiError::from_app(AppError::conflict("email already exists"), "Failed to create user");
        assert_eq!(err.error.as_deref(), Some("email already exists"));
    }
}
