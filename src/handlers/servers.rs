use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use super::shared::{fetch_server, require_member, require_owner, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppJson, AppResult},
    models::{Membership, Server},
    state::AppState,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServerRequest {
    #[validate(length(min = 2, max = 100, message = "Server name must be 2-100 characters"))]
    pub name: String,
    #[validate(url(message = "icon_url must be a valid URL"))]
    pub icon_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateServerRequest {
    #[validate(length(min = 2, max = 100, message = "Server name must be 2-100 characters"))]
    pub name: Option<String>,
    #[validate(url(message = "icon_url must be a valid URL"))]
    pub icon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub user_id: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/servers — create a server; creator is auto-joined as owner and
/// the two default channels are materialized, all in one transaction.
pub async fn create_server(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CreateServerRequest>,
) -> AppResult<(StatusCode, Json<Server>)> {
    req.validate().map_err(validation_error)?;

    let mut tx = state.pool.begin().await?;

    let server = sqlx::query_as::<_, Server>(
        "INSERT INTO servers (name, icon_url, owner_id)
         VALUES ($1, $2, $3)
         RETURNING id, name, icon_url, owner_id, created_at",
    )
    .bind(&req.name)
    .bind(&req.icon_url)
    .bind(auth.user_id())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO memberships (user_id, server_id) VALUES ($1, $2)")
        .bind(auth.user_id())
        .bind(server.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO channels (server_id, name, kind, position)
         VALUES ($1, 'general', 'TEXT', 0), ($1, 'voice', 'VOICE', 1)",
    )
    .bind(server.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(server_id = server.id, owner_id = auth.user_id(), "Server created");

    Ok((StatusCode::CREATED, Json(server)))
}

/// GET /api/servers — list servers the caller is an active member of,
/// in creation order.
pub async fn list_servers(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Server>>> {
    let servers = sqlx::query_as::<_, Server>(
        "SELECT s.id, s.name, s.icon_url, s.owner_id, s.created_at
         FROM servers s
         JOIN memberships m ON m.server_id = s.id
         WHERE m.user_id = $1 AND m.left_at IS NULL
         ORDER BY s.created_at ASC",
    )
    .bind(auth.user_id())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(servers))
}

/// GET /api/servers/:id — a single server (members only).
pub async fn get_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
) -> AppResult<Json<Server>> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;
    Ok(Json(server))
}

/// PATCH /api/servers/:id — update name or icon (owner only).
pub async fn update_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
    AppJson(req): AppJson<UpdateServerRequest>,
) -> AppResult<Json<Server>> {
    req.validate().map_err(validation_error)?;

    let server = fetch_server(&state.pool, server_id).await?;
    require_owner(&server, auth.user_id(), "update it")?;

    let updated = sqlx::query_as::<_, Server>(
        "UPDATE servers
         SET name     = COALESCE($1, name),
             icon_url = COALESCE($2, icon_url)
         WHERE id = $3
         RETURNING id, name, icon_url, owner_id, created_at",
    )
    .bind(&req.name)
    .bind(&req.icon_url)
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/servers/:id — delete the server and all its data (owner only).
///
/// Channels, memberships and messages go with it via FK cascade.
pub async fn delete_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
) -> AppResult<StatusCode> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_owner(&server, auth.user_id(), "delete it")?;

    sqlx::query("DELETE FROM servers WHERE id = $1")
        .bind(server_id)
        .execute(&state.pool)
        .await?;

    info!(server_id, "Server deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/servers/:id/join — join (or rejoin) a server.
///
/// A membership row is never duplicated: rejoining clears `left_at` on the
/// existing row, and joining while already active is a 409.
pub async fn join_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
) -> AppResult<Json<Value>> {
    fetch_server(&state.pool, server_id).await?;

    let existing = sqlx::query_as::<_, Membership>(
        "SELECT user_id, server_id, joined_at, left_at
         FROM memberships WHERE server_id = $1 AND user_id = $2",
    )
    .bind(server_id)
    .bind(auth.user_id())
    .fetch_optional(&state.pool)
    .await?;

    let message = match existing {
        Some(m) if m.is_active() => {
            return Err(AppError::Conflict("Already a member of this server".into()));
        }
        Some(_) => {
            sqlx::query(
                "UPDATE memberships SET left_at = NULL
                 WHERE server_id = $1 AND user_id = $2",
            )
            .bind(server_id)
            .bind(auth.user_id())
            .execute(&state.pool)
            .await?;
            "Successfully rejoined the server"
        }
        None => {
            sqlx::query("INSERT INTO memberships (user_id, server_id) VALUES ($1, $2)")
                .bind(auth.user_id())
                .bind(server_id)
                .execute(&state.pool)
                .await?;
            "Successfully joined the server"
        }
    };

    Ok(Json(json!({ "message": message })))
}

/// DELETE /api/servers/:id/leave — leave a server (non-owners only).
///
/// The membership row is kept with `left_at` set, preserving join history
/// and making rejoin an update rather than a new row.
pub async fn leave_server(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_member(&state.pool, server_id, auth.user_id()).await?;

    if server.owner_id == auth.user_id() {
        return Err(AppError::Validation(
            "Server owner cannot leave without transferring ownership".into(),
        ));
    }

    sqlx::query(
        "UPDATE memberships SET left_at = NOW()
         WHERE server_id = $1 AND user_id = $2 AND left_at IS NULL",
    )
    .bind(server_id)
    .bind(auth.user_id())
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({ "message": "Successfully left the server" })))
}

/// POST /api/servers/:id/transfer — hand ownership to another active member
/// (owner only). This is the release valve for the owner-cannot-leave rule.
pub async fn transfer_ownership(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(server_id): Path<i64>,
    AppJson(req): AppJson<TransferOwnershipRequest>,
) -> AppResult<Json<Server>> {
    let server = fetch_server(&state.pool, server_id).await?;
    require_owner(&server, auth.user_id(), "transfer ownership")?;

    if req.user_id == auth.user_id() {
        return Err(AppError::Validation(
            "Cannot transfer ownership to yourself".into(),
        ));
    }

    // The new owner must already be an active member. Only the not-a-member
    // case is rephrased; anything else (e.g. a database failure) propagates.
    match require_member(&state.pool, server_id, req.user_id).await {
        Ok(_) => {}
        Err(AppError::NotFound(_)) => {
            return Err(AppError::Validation(
                "New owner must be an active member of the server".into(),
            ));
        }
        Err(e) => return Err(e),
    }

    let updated = sqlx::query_as::<_, Server>(
        "UPDATE servers SET owner_id = $1
         WHERE id = $2
         RETURNING id, name, icon_url, owner_id, created_at",
    )
    .bind(req.user_id)
    .bind(server_id)
    .fetch_one(&state.pool)
    .await?;

    info!(server_id, new_owner_id = req.user_id, "Server ownership transferred");

    Ok(Json(updated))
}
