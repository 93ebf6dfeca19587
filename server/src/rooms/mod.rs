//! Room Coordination
//!
//! The realtime core: the in-memory registry, fan-out engine, socket
//! sessions, message routing, and the room HTTP surface.

pub mod error;
pub mod events;
pub mod handlers;
pub mod participant;
pub mod registry;
pub mod router;
pub mod socket;

pub use registry::Registry;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::api::AppState;
use crate::auth::require_auth;

/// Build the `/rooms` router.
pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/", post(handlers::create_room))
        .route("/{room_id}", get(handlers::get_room))
        .route("/{room_id}/ice-servers", get(handlers::get_ice_servers))
        .route("/{room_id}/messages", get(handlers::get_chat_history))
        .route("/{room_id}/whiteboard", get(handlers::get_whiteboard_history))
        .route("/{room_id}/upload", post(handlers::upload_file))
        .layer(from_fn_with_state(state, require_auth));

    // Socket auth is a token query parameter, checked in the handler itself.
    Router::new()
        .merge(protected)
        .route("/ws/{room_id}", get(socket::handler))
}
