use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use super::shared::{
    fetch_channel, fetch_message, fetch_server, require_member, validation_error,
};
use crate::{
    auth::AuthUser,
    broker::events::{EVENT_MESSAGE_CREATE, EVENT_MESSAGE_DELETE, EVENT_MESSAGE_UPDATE},
    error::{AppError, AppJson, AppResult},
    models::{MessageDto, MessageRow},
    state::AppState,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, max = 2000, message = "content must be 1-2000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMessageRequest {
    #[validate(length(min = 1, max = 2000, message = "content must be 1-2000 characters"))]
    pub content: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/servers/:id/channels/:channel_id/messages — send a message
/// (members only).
///
/// The insert commits before the broadcast fires, so a subscriber acting on
/// the event always observes the new row.
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
    AppJson(req): AppJson<CreateMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageDto>)> {
    req.validate().map_err(validation_error)?;

    require_member(&state.pool, server_id, auth.user_id()).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    let message_id: i64 = sqlx::query_scalar(
        "INSERT INTO messages (channel_id, author_id, content)
         VALUES ($1, $2, $3)
         RETURNING id",
    )
    .bind(channel_id)
    .bind(auth.user_id())
    .bind(&req.content)
    .fetch_one(&state.pool)
    .await?;

    let dto: MessageDto = fetch_message(&state.pool, channel_id, message_id)
        .await?
        .into();

    publish_message_view(&state, channel_id, EVENT_MESSAGE_CREATE, &dto);

    Ok((StatusCode::CREATED, Json(dto)))
}

/// GET /api/servers/:id/channels/:channel_id/messages — channel history,
/// oldest first (members only).
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
) -> AppResult<Json<Vec<MessageDto>>> {
    require_member(&state.pool, server_id, auth.user_id()).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    // Compound (created_at, id) ordering keeps the list stable even when two
    // messages land in the same microsecond.
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT m.id, m.channel_id, m.content, m.created_at, m.edited_at,
                u.id AS author_id, u.username AS author_username,
                u.display_name AS author_display_name, u.avatar_url AS author_avatar_url
         FROM messages m
         JOIN users u ON u.id = m.author_id
         WHERE m.channel_id = $1
         ORDER BY m.created_at ASC, m.id ASC",
    )
    .bind(channel_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(MessageDto::from).collect()))
}

/// PATCH /api/servers/:id/channels/:channel_id/messages/:message_id — edit a
/// message (author only).
pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id, message_id)): Path<(i64, i64, i64)>,
    AppJson(req): AppJson<UpdateMessageRequest>,
) -> AppResult<Json<MessageDto>> {
    req.validate().map_err(validation_error)?;

    require_member(&state.pool, server_id, auth.user_id()).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;
    let message = fetch_message(&state.pool, channel_id, message_id).await?;

    if message.author_id != auth.user_id() {
        return Err(AppError::Forbidden(
            "You can only edit your own messages".into(),
        ));
    }

    sqlx::query("UPDATE messages SET content = $1, edited_at = NOW() WHERE id = $2")
        .bind(&req.content)
        .bind(message_id)
        .execute(&state.pool)
        .await?;

    let dto: MessageDto = fetch_message(&state.pool, channel_id, message_id)
        .await?
        .into();

    publish_message_view(&state, channel_id, EVENT_MESSAGE_UPDATE, &dto);

    Ok(Json(dto))
}

/// DELETE /api/servers/:id/channels/:channel_id/messages/:message_id —
/// delete a message (author or server owner).
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id, message_id)): Path<(i64, i64, i64)>,
) -> AppResult<StatusCode> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;
    let message = fetch_message(&state.pool, channel_id, message_id).await?;

    let is_author = message.author_id == auth.user_id();
    let is_owner = server.owner_id == auth.user_id();

    if !is_author && !is_owner {
        return Err(AppError::Forbidden(
            "You do not have permission to delete this message".into(),
        ));
    }

    sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(message_id)
        .execute(&state.pool)
        .await?;

    // The id travels as a decimal string so JavaScript clients keep full
    // 64-bit precision.
    state.broker.publish(
        channel_id,
        EVENT_MESSAGE_DELETE,
        json!({ "id": message_id.to_string() }),
    );

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Private helpers
// ============================================================================

/// Broadcast the full message view to the channel's subscribers.
///
/// Serialization failures are logged and swallowed: the write has already
/// committed and must not be reported as failed to the HTTP caller.
fn publish_message_view(state: &AppState, channel_id: i64, event: &str, dto: &MessageDto) {
    match serde_json::to_value(dto) {
        Ok(payload) => state.broker.publish(channel_id, event, payload),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to serialize MessageDto for broadcast");
        }
    }
}
