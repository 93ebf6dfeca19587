//! Authentication
//!
//! Bearer-token auth: stateless login, JWT mint/verify, and the middleware
//! that guards the HTTP surface.

pub mod error;
pub mod handlers;
pub mod jwt;
pub mod middleware;

pub use error::{AuthError, AuthResult};
pub use middleware::{require_auth, AuthUser};

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::api::AppState;

/// Build the `/auth` router.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/login", post(handlers::login))
        .route(
            "/me",
            get(handlers::me).route_layer(from_fn_with_state(state, require_auth)),
        )
}
