//! JWT Token Generation and Validation
//!
//! Symmetric HMAC signing (HS256 by default, configurable). Tokens carry the
//! user id and display name so the socket layer can admit a participant
//! without any user database lookup.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthResult};
use crate::config::Config;

/// JWT claims for access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Display name.
    pub username: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

fn signing_algorithm(config: &Config) -> AuthResult<Algorithm> {
    config
        .algorithm
        .parse()
        .map_err(|_| AuthError::Internal(format!("Unknown JWT algorithm: {}", config.algorithm)))
}

/// Generate an access token for a user.
pub fn issue_access_token(user_id: &str, username: &str, config: &Config) -> AuthResult<String> {
    let now = Utc::now();

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: (now + Duration::minutes(config.access_token_exp_mins)).timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::new(signing_algorithm(config)?),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )?;

    Ok(token)
}

/// Validate and decode an access token.
///
/// Returns an error if the token is malformed, has a bad signature, or has
/// expired.
pub fn verify_access_token(token: &str, config: &Config) -> AuthResult<Claims> {
    let mut validation = Validation::new(signing_algorithm(config)?);
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(token_data.claims)
}
