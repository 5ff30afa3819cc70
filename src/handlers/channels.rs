use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use super::shared::{fetch_channel, fetch_server, require_member, require_owner, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppJson, AppResult},
    models::{Channel, ChannelKind},
    state::AppState,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Channel name must be 1-100 characters"))]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateChannelRequest {
    #[validate(length(min = 1, max = 100, message = "Channel name must be 1-100 characters"))]
    pub name: Option<String>,
    pub position: Option<i32>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/servers/:id/channels — create a channel (owner only).
///
/// Names are stored lowercased so the `(server, type, name)` uniqueness check
/// is case-insensitive. Position defaults to the current channel count, so
/// new channels land after the existing ones.
pub async fn create_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
    AppJson(req): AppJson<CreateChannelRequest>,
) -> AppResult<(StatusCode, Json<Channel>)> {
    req.validate().map_err(validation_error)?;

    let server = fetch_server(&state.pool, server_id).await?;
    require_owner(&server, auth.user_id(), "create channels")?;

    let name = req.name.trim().to_lowercase();

    let position: i32 =
        sqlx::query_scalar("SELECT COUNT(*)::int FROM channels WHERE server_id = $1")
            .bind(server_id)
            .fetch_one(&state.pool)
            .await?;

    // Duplicate (server, kind, name) triples violate the unique constraint
    // and surface as a typed 409 via From<sqlx::Error>.
    let channel = sqlx::query_as::<_, Channel>(
        "INSERT INTO channels (server_id, name, kind, position)
         VALUES ($1, $2, $3, $4)
         RETURNING id, server_id, name, kind, position, created_at",
    )
    .bind(server_id)
    .bind(&name)
    .bind(req.kind)
    .bind(position)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(channel)))
}

/// GET /api/servers/:id/channels — list channels in display order
/// (members only).
pub async fn list_channels(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
) -> AppResult<Json<Vec<Channel>>> {
    fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    let channels = sqlx::query_as::<_, Channel>(
        "SELECT id, server_id, name, kind, position, created_at
         FROM channels WHERE server_id = $1
         ORDER BY position ASC, id ASC",
    )
    .bind(server_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(channels))
}

/// PATCH /api/servers/:id/channels/:channel_id — rename or reposition a
/// channel (owner only).
pub async fn update_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
    AppJson(req): AppJson<UpdateChannelRequest>,
) -> AppResult<Json<Channel>> {
    req.validate().map_err(validation_error)?;

    let server = fetch_server(&state.pool, server_id).await?;
    require_owner(&server, auth.user_id(), "update channels")?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    let name = req.name.map(|n| n.trim().to_lowercase());

    let updated = sqlx::query_as::<_, Channel>(
        "UPDATE channels
         SET name     = COALESCE($1, name),
             position = COALESCE($2, position)
         WHERE id = $3 AND server_id = $4
         RETURNING id, server_id, name, kind, position, created_at",
    )
    .bind(&name)
    .bind(req.position)
    .bind(channel_id)
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/servers/:id/channels/:channel_id — delete a channel and its
/// messages (owner only).
pub async fn delete_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_owner(&server, auth.user_id(), "delete channels")?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    sqlx::query("DELETE FROM channels WHERE id = $1 AND server_id = $2")
        .bind(channel_id)
        .bind(server_id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
