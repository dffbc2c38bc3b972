use crate::upstream::client::UpstreamError;
use crate::upstream::validate::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 请求边界上的错误分类；每个变体对应一个固定的 HTTP 状态码。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid request format: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to proxy request: {0}")]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Debug, Serialize)]
struct ErrorBodyInner {
    message: String,
    r#type: &'static str,
    code: u16,
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "authentication_error",
            AppError::QuotaExceeded(_) => "rate_limit_error",
            AppError::BadRequest(_) | AppError::Validation(_) => "invalid_request_error",
            AppError::Upstream(_) => "upstream_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: ErrorBodyInner {
                message: self.to_string(),
                r#type: self.kind(),
                code: status.as_u16(),
            },
        };

        (status, Json(body)).into_response()
    }
}
