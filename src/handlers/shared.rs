use crate::{
    error::{AppError, AppResult},
    models::{Channel, Membership, MessageRow, Server},
};

/// Convert [`validator::ValidationErrors`] into an [`AppError::Validation`] with
/// a human-readable message. Shared across all handler modules to avoid
/// copy-pasting the same boilerplate.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        e.field_errors()
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|e| e.message.as_ref())
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Fetch a server row, returning 404 if it does not exist.
pub async fn fetch_server(pool: &sqlx::PgPool, server_id: i64) -> AppResult<Server> {
    sqlx::query_as::<_, Server>(
        "SELECT id, name, icon_url, owner_id, created_at
         FROM servers WHERE id = $1",
    )
    .bind(server_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Server not found".into()))
}

/// Verify the user is an active member of the server (`left_at IS NULL`).
///
/// Returns 404 (not 403) when the user is not a member — this prevents leaking
/// information about server existence to non-member users.
pub async fn require_member(
    pool: &sqlx::PgPool,
    server_id: i64,
    user_id: i64,
) -> AppResult<Membership> {
    sqlx::query_as::<_, Membership>(
        "SELECT user_id, server_id, joined_at, left_at
         FROM memberships
         WHERE server_id = $1 AND user_id = $2 AND left_at IS NULL",
    )
    .bind(server_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Server not found".into()))
}

/// Verify the caller owns the server, returning 403 otherwise.
pub fn require_owner(server: &Server, user_id: i64, action: &str) -> AppResult<()> {
    if server.owner_id != user_id {
        return Err(AppError::Forbidden(format!(
            "Only the server owner can {action}"
        )));
    }
    Ok(())
}

/// Fetch a channel scoped to its server, returning 404 if it does not exist
/// there.
pub async fn fetch_channel(
    pool: &sqlx::PgPool,
    server_id: i64,
    channel_id: i64,
) -> AppResult<Channel> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, server_id, name, kind, position, created_at
         FROM channels WHERE id = $1 AND server_id = $2",
    )
    .bind(channel_id)
    .bind(server_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Channel not found".into()))
}

/// Fetch a message scoped to its channel, joined with its (possibly ghosted)
/// author, returning 404 if it does not exist there.
pub async fn fetch_message(
    pool: &sqlx::PgPool,
    channel_id: i64,
    message_id: i64,
) -> AppResult<MessageRow> {
    sqlx::query_as::<_, MessageRow>(
        "SELECT m.id, m.channel_id, m.content, m.created_at, m.edited_at,
                u.id AS author_id, u.username AS author_username,
                u.display_name AS author_display_name, u.avatar_url AS author_avatar_url
         FROM messages m
         JOIN users u ON u.id = m.author_id
         WHERE m.id = $1 AND m.channel_id = $2",
    )
    .bind(message_id)
    .bind(channel_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Message not found".into()))
}
