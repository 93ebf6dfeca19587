//! Authentication Middleware

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use super::error::AuthError;
use super::jwt::verify_access_token;
use crate::api::AppState;

/// Authenticated user injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// User ID.
    pub user_id: String,
    /// Display name.
    pub username: String,
}

/// Middleware to require authentication.
///
/// Extracts the Bearer token from the Authorization header, validates it,
/// and injects [`AuthUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?;

    let claims = verify_access_token(token, &state.config)?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        username: claims.username,
    });

    Ok(next.run(request).await)
}

/// Extractor for the authenticated user in handlers.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}
