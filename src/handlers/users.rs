use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::auth::{normalize_identity, USERNAME_RE};
use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::{AppError, AppJson, AppResult},
    models::{PrivateUserDto, User, UserDto},
    state::AppState,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(
        length(min = 3, max = 32, message = "username must be 3-32 characters"),
        regex(
            path = *USERNAME_RE,
            message = "username may only contain lowercase letters, numbers and underscores"
        )
    )]
    pub username: Option<String>,
    #[validate(email(message = "email must be a valid email address"))]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 100, message = "display_name must be 1-100 characters"))]
    pub display_name: Option<String>,
    /// Free-form status text; capped at 128 characters.
    #[validate(length(max = 128, message = "status must be at most 128 characters"))]
    pub status: Option<String>,
    #[validate(url(message = "avatar_url must be a valid URL"))]
    pub avatar_url: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/users/@me — the caller's own profile, email included.
pub async fn get_current_user(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<PrivateUserDto>> {
    let user = fetch_user(&state.pool, auth.user_id()).await?;
    Ok(Json(user.into()))
}

/// PATCH /api/users/@me — partial profile update.
///
/// Identity fields are normalized before the write, so uniqueness checks and
/// later logins both see the canonical form.
pub async fn update_current_user(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<UpdateUserRequest>,
) -> AppResult<Json<PrivateUserDto>> {
    let req = UpdateUserRequest {
        username: req.username.as_deref().map(normalize_identity),
        email: req.email.as_deref().map(normalize_identity),
        ..req
    };
    req.validate().map_err(validation_error)?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users
         SET username     = COALESCE($1, username),
             email        = COALESCE($2, email),
             display_name = COALESCE($3, display_name),
             status       = COALESCE($4, status),
             avatar_url   = COALESCE($5, avatar_url),
             updated_at   = NOW()
         WHERE id = $6 AND deleted = FALSE
         RETURNING id, username, email, display_name, status, avatar_url,
                   password_hash, deleted, created_at, updated_at",
    )
    .bind(&req.username)
    .bind(&req.email)
    .bind(&req.display_name)
    .bind(&req.status)
    .bind(&req.avatar_url)
    .bind(auth.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user.into()))
}

/// DELETE /api/users/@me — ghost the account.
///
/// The row survives so message authorship never dangles: the username becomes
/// `ghost_<id>`, the display name "Deleted User", and credentials are nulled.
/// All sessions are revoked in the same transaction.
pub async fn delete_current_user(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<StatusCode> {
    let mut tx = state.pool.begin().await?;

    let ghosted = sqlx::query(
        "UPDATE users
         SET username      = 'ghost_' || id,
             display_name  = 'Deleted User',
             email         = NULL,
             password_hash = NULL,
             avatar_url    = NULL,
             status        = '',
             deleted       = TRUE,
             updated_at    = NOW()
         WHERE id = $1 AND deleted = FALSE",
    )
    .bind(auth.user_id())
    .execute(&mut *tx)
    .await?;

    if ghosted.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".into()));
    }

    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(auth.user_id())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(user_id = auth.user_id(), "Account ghosted");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/users/:id — another user's public profile (no email).
///
/// The path segment is parsed by hand so a non-numeric id yields a 400 with a
/// named error rather than a framework rejection.
pub async fn get_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<UserDto>> {
    let user_id: i64 = user_id
        .parse()
        .map_err(|_| AppError::Validation("invalid user ID format".into()))?;

    let user = fetch_user(&state.pool, user_id).await?;
    Ok(Json(user.into()))
}

// ============================================================================
// Private helpers
// ============================================================================

/// Fetch a live (non-ghosted) user by id, returning 404 otherwise.
async fn fetch_user(pool: &sqlx::PgPool, user_id: i64) -> AppResult<User> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, email, display_name, status, avatar_url,
                password_hash, deleted, created_at, updated_at
         FROM users WHERE id = $1 AND deleted = FALSE",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))
}
