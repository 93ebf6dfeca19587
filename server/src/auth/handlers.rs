//! Authentication Handlers
//!
//! Stateless login: any non-empty credential pair is accepted and mapped to
//! a fresh user id. Identity lives entirely in the signed token.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::error::{AuthError, AuthResult};
use super::jwt::issue_access_token;
use super::middleware::AuthUser;
use crate::api::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Display name.
    pub username: String,
    /// Password (presence-checked only).
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer access token.
    pub access_token: String,
    /// Token type ("bearer").
    pub token_type: &'static str,
    /// Minted user ID.
    pub user_id: String,
    /// Display name echoed back.
    pub username: String,
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AuthResult<Json<LoginResponse>> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }

    let user_id = Uuid::new_v4().to_string();
    let access_token = issue_access_token(&user_id, &request.username, &state.config)?;

    info!(user_id = %user_id, username = %request.username, "User logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
        user_id,
        username: request.username,
    }))
}

/// Current user response body.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// User ID.
    pub user_id: String,
    /// Display name.
    pub username: String,
}

/// `GET /auth/me`
pub async fn me(auth_user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: auth_user.user_id,
        username: auth_user.username,
    })
}
