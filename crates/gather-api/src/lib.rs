pub mod auth;
pub mod conversations;
pub mod error;
pub mod events;
pub mod groups;
pub mod maps;
pub mod middleware;
pub mod notifications;
pub mod search;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// All `/api` routes except the WebSocket gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/search", get(search::search))
        .route("/search/suggestions", get(search::suggestions));

    let protected_routes = Router::new()
        .route("/events", post(events::create_event))
        .route("/events/{event_id}", get(events::get_event).patch(events::update_event))
        .route("/events/{event_id}/occurrences", get(events::list_occurrences))
        .route("/events/{event_id}/rsvp", post(events::rsvp))
        .route("/events/{event_id}/attendees", get(events::list_attendees))
        .route("/groups", post(groups::create_group))
        .route("/groups/{group_id}", get(groups::get_group).delete(groups::delete_group))
        .route("/groups/{group_id}/join", post(groups::join_group))
        .route("/groups/{group_id}/admins", post(groups::invite_admin))
        .route("/groups/{group_id}/admins/accept", post(groups::accept_admin_invite))
        .route(
            "/groups/{group_id}/requests/{user_id}/approve",
            post(groups::approve_request),
        )
        .route(
            "/groups/{group_id}/requests/{user_id}/decline",
            post(groups::decline_request),
        )
        .route("/groups/{group_id}/transfer", post(groups::request_transfer))
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations/unread", get(conversations::unread_conversations))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new().nest(
        "/api",
        public_routes.merge(protected_routes).with_state(state),
    )
}
