//! API route definitions

use super::chat_handlers;
use super::handlers::{self, ApiState};
use super::ws_handlers;
use crate::auth::middleware::require_auth;
use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // ========================================================================
    // Protected routes (bearer credential, or anonymous mode)
    // ========================================================================
    let protected = Router::new()
        // Conversations
        .route(
            "/api/projects/{project_id}/messages",
            post(chat_handlers::send_message),
        )
        .route(
            "/api/projects/{project_id}/messages/search",
            get(chat_handlers::search_messages),
        )
        .route(
            "/api/projects/{project_id}/messages/{message_id}/replies",
            post(chat_handlers::reply_to_message),
        )
        .route(
            "/api/projects/{project_id}/threads",
            get(chat_handlers::list_threads),
        )
        .route(
            "/api/projects/{project_id}/statistics",
            get(chat_handlers::get_statistics),
        )
        .route(
            "/api/projects/{project_id}/read",
            post(chat_handlers::mark_as_read),
        )
        .route(
            "/api/projects/{project_id}/presence",
            get(chat_handlers::get_presence),
        )
        .route(
            "/api/projects/{project_id}/context",
            get(chat_handlers::get_context),
        )
        // Moderation
        .route(
            "/api/projects/{project_id}/timeouts",
            post(chat_handlers::timeout_user),
        )
        .route(
            "/api/projects/{project_id}/flags",
            get(chat_handlers::list_flags),
        )
        // Messages and threads
        .route(
            "/api/messages/{message_id}",
            delete(chat_handlers::delete_message),
        )
        .route(
            "/api/messages/{message_id}/thread",
            post(chat_handlers::create_thread),
        )
        .route(
            "/api/threads/{thread_id}/messages",
            get(chat_handlers::get_thread_messages),
        )
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // ========================================================================
    // Public routes (the WebSocket authenticates its own handshake)
    // ========================================================================
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/ws/chat", get(ws_handlers::ws_chat));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
