use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::{
        create_session, hash_password, revoke_session, verify_password, SESSION_COOKIE,
    },
    error::{AppError, AppJson, AppResult},
    models::User,
    state::AppState,
};

/// Post-normalization username charset. Also keeps the `ghost_` namespace
/// honest: a live user can register `ghost_x`, but ghosted rows sit outside
/// the unique index so renames on delete can never collide with them.
pub(super) static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());

/// Identity fields are compared case-insensitively and ignore stray
/// whitespace; everything is stored already normalized so no query ever sees
/// a raw value.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 32, message = "username must be 3-32 characters"),
        regex(
            path = *USERNAME_RE,
            message = "username may only contain lowercase letters, numbers and underscores"
        )
    )]
    pub username: String,
    #[validate(email(message = "email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "display_name must be 1-100 characters"))]
    pub display_name: String,
}

impl RegisterRequest {
    fn normalized(mut self) -> Self {
        self.username = normalize_identity(&self.username);
        self.email = normalize_identity(&self.email);
        self
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username or email; resolved in that order after normalization.
    #[validate(length(min = 1, message = "identity is required"))]
    pub identity: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register — create an account.
pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let req = req.normalized();
    req.validate().map_err(validation_error)?;

    let password_hash = hash_password(&req.password)?;

    // The partial unique indexes on live usernames/emails surface duplicates
    // as 23505, translated to a typed 409 by From<sqlx::Error>.
    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, email, display_name, password_hash)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(&req.username)
    .bind(&req.email)
    .bind(&req.display_name)
    .bind(&password_hash)
    .fetch_one(&state.pool)
    .await?;

    info!(user_id, username = %req.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": user_id,
            "message": "User registered successfully",
        })),
    ))
}

/// POST /api/auth/login — exchange credentials for a session cookie.
///
/// An unknown identity and a wrong password produce the same 401 body;
/// nothing distinguishes "no such user" from "bad password".
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<Value>)> {
    req.validate().map_err(validation_error)?;

    let identity = normalize_identity(&req.identity);

    let Some(user) = find_by_identity(&state.pool, &identity).await? else {
        return Err(AppError::Auth("Invalid credentials".into()));
    };

    // Ghosted accounts have no hash; they fail the same way as a bad password.
    let valid = match user.password_hash.as_deref() {
        Some(hash) => verify_password(&req.password, hash)?,
        None => false,
    };
    if !valid {
        return Err(AppError::Auth("Invalid credentials".into()));
    }

    let token = create_session(&state.pool, user.id).await?;

    info!(user_id = user.id, username = %user.username, "Login successful");

    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((jar.add(cookie), Json(json!({ "message": "Login successful" }))))
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    pub token: Option<String>,
}

/// POST /api/auth/logout — revoke the current session.
///
/// Idempotent: logging out with a missing, expired or already-revoked token
/// still returns 200 and clears the cookie.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    axum::extract::Query(query): axum::extract::Query<LogoutQuery>,
) -> AppResult<(CookieJar, Json<Value>)> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_owned())
        .or(query.token);

    if let Some(token) = token {
        revoke_session(&state.pool, &token).await?;
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());

    Ok((jar, Json(json!({ "message": "Logged out" }))))
}

// ============================================================================
// Private helpers
// ============================================================================

/// Resolve a normalized identity to a live user: username first, then email.
async fn find_by_identity(pool: &sqlx::PgPool, identity: &str) -> AppResult<Option<User>> {
    let by_username = sqlx::query_as::<_, User>(
        "SELECT id, username, email, display_name, status, avatar_url,
                password_hash, deleted, created_at, updated_at
         FROM users WHERE username = $1 AND deleted = FALSE",
    )
    .bind(identity)
    .fetch_optional(pool)
    .await?;

    if by_username.is_some() {
        return Ok(by_username);
    }

    let by_email = sqlx::query_as::<_, User>(
        "SELECT id, username, email, display_name, status, avatar_url,
                password_hash, deleted, created_at, updated_at
         FROM users WHERE email = $1 AND deleted = FALSE",
    )
    .bind(identity)
    .fetch_optional(pool)
    .await?;

    Ok(by_email)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_identity("   WeIrDCaSe_User  "), "weirdcase_user");
        assert_eq!(
            normalize_identity("MIXED_email@Hermes.Local"),
            "mixed_email@hermes.local"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_identity("  Alice  ");
        assert_eq!(normalize_identity(&once), once);
    }

    #[test]
    fn register_request_rejects_short_username() {
        let req = RegisterRequest {
            username: "ab".into(),
            email: "a@b.com".into(),
            password: "password123".into(),
            display_name: "Bob".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn register_request_rejects_short_password() {
        let req = RegisterRequest {
            username: "gooduser".into(),
            email: "a@b.com".into(),
            password: "short".into(),
            display_name: "Bob".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn register_request_rejects_bad_email() {
        let req = RegisterRequest {
            username: "gooduser".into(),
            email: "not-a-valid-email".into(),
            password: "password123".into(),
            display_name: "Bob".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn register_request_accepts_normalized_mixed_case_input() {
        let req = RegisterRequest {
            username: "   WeIrDCaSe_User  ".into(),
            email: "MIXED_email@Hermes.Local".into(),
            password: "password123".into(),
            display_name: "Normalization Test".into(),
        }
        .normalized();

        assert_eq!(req.username, "weirdcase_user");
        assert_eq!(req.email, "mixed_email@hermes.local");
        assert!(req.validate().is_ok());
    }
}
