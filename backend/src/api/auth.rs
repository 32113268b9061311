//! Login endpoints and the bearer-token guard

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::header,
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::auth::{AuthError, Claims};
use crate::error::{AppError, AppResult};
use crate::models::{Credentials, TokenResponse};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Exchange credentials for a bearer token
#[utoipa::path(
    post,
    path = "/auth",
    tag = "auth",
    request_body = Credentials,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Malformed credentials"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<ApiResponse<TokenResponse>> {
    let Json(credentials) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let token = state.auth.authenticate(&credentials).await?;
    Ok(ApiResponse::success(token))
}

/// Tokens are stateless; the client discards its copy
#[utoipa::path(
    post,
    path = "/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn logout(Extension(claims): Extension<Claims>) -> ApiResponse<LogoutResponse> {
    tracing::info!(user_id = %claims.sub, "User logged out");
    ApiResponse::success(LogoutResponse {
        message: "logged out".to_string(),
    })
}

/// Identity carried by the presented token
#[utoipa::path(
    get,
    path = "/me",
    tag = "auth",
    responses(
        (status = 200, description = "Token is valid", body = SessionInfo),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn me(Extension(claims): Extension<Claims>) -> ApiResponse<SessionInfo> {
    ApiResponse::success(SessionInfo {
        user_id: claims.sub,
        expires_at: claims.exp,
    })
}

/// Reject requests without a valid `Authorization: Bearer <token>` header
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    let claims = state.auth.validate(token.trim())?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
