/**
 * API Route Handlers
 *
 * This module defines the `/api` routes. Every route here requires a bearer
 * token; the auth layer is applied by the router.
 *
 * # Routes
 *
 * ## Messages
 * - `POST /api/channels/{channel_id}/messages` - Create a message (201)
 * - `GET /api/channels/{channel_id}/messages` - Timeline page
 * - `PATCH /api/messages/{message_id}` - Edit the body
 * - `DELETE /api/messages/{message_id}` - Soft-delete with thread cascade (204)
 * - `GET /api/messages/{message_id}/thread` - Parent and replies
 *
 * ## Reactions
 * - `POST /api/messages/{message_id}/reactions` - Add (201)
 * - `DELETE /api/messages/{message_id}/reactions/{emoji}` - Remove (204)
 *
 * ## Read state
 * - `POST /api/channels/{channel_id}/reads` - Move the read watermark
 * - `GET /api/channels/{channel_id}/unread_count` - Unread count for one channel
 * - `GET /api/unread` - Non-zero unread counts for every visible channel
 */
use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::backend::messaging::handlers::{
    add_reaction, all_unread, create_message, delete_message, get_thread, list_messages,
    remove_reaction, unread_count, update_message, update_read_state,
};
use crate::backend::server::state::AppState;

/// Configure API routes
pub fn configure_api_routes(router: Router<AppState>) -> Router<AppState> {
    router
        // Channel timeline
        .route(
            "/api/channels/{channel_id}/messages",
            post(create_message).get(list_messages),
        )
        // Single message
        .route(
            "/api/messages/{message_id}",
            patch(update_message).delete(delete_message),
        )
        .route("/api/messages/{message_id}/thread", get(get_thread))
        // Reactions
        .route("/api/messages/{message_id}/reactions", post(add_reaction))
        .route(
            "/api/messages/{message_id}/reactions/{emoji}",
            delete(remove_reaction),
        )
        // Read state
        .route("/api/channels/{channel_id}/reads", post(update_read_state))
        .route("/api/channels/{channel_id}/unread_count", get(unread_count))
        .route("/api/unread", get(all_unread))
}
