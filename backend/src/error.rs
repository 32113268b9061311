//! Application error type shared by every HTTP handler

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::api::response::ApiResponse;
use crate::auth::AuthError;
use crate::presence::StoreError;
use crate::relay::RelayError;
use crate::tunnel::ProvisioningError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        AppError::BadRequest(msg.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code placed in the response envelope
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::BadGateway(_) => "UPSTREAM_UNREACHABLE",
            AppError::GatewayTimeout(_) => "UPSTREAM_TIMEOUT",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        }

        // Storage detail stays in the logs
        let message = match &self {
            AppError::Database(_) => "database operation failed".to_string(),
            other => other.to_string(),
        };

        (status, ApiResponse::error(self.code(), message)).into_response()
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NodeNotFound(_) => AppError::NotFound(err.to_string()),
            RelayError::MissingPath => AppError::BadRequest(err.to_string()),
            RelayError::Unreachable(_) => AppError::BadGateway(err.to_string()),
            RelayError::Timeout(_) => AppError::GatewayTimeout(err.to_string()),
            RelayError::Directory(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound(err.to_string()),
            StoreError::Unavailable(_) => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<ProvisioningError> for AppError {
    fn from(err: ProvisioningError) -> Self {
        AppError::Internal(format!("failed to provision tunnel: {}", err))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::MissingToken
            | AuthError::InvalidToken => AppError::Unauthorized(err.to_string()),
            AuthError::Hashing(_) | AuthError::Token(_) => AppError::Internal(err.to_string()),
            AuthError::Database(e) => AppError::Database(e),
        }
    }
}
