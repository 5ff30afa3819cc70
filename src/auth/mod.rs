use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Name of the session cookie set on login and read back by the extractor.
pub const SESSION_COOKIE: &str = "hermes_session";

/// Sessions live for 30 days unless revoked by logout or account deletion.
const SESSION_TTL_DAYS: i64 = 30;

// ============================================================================
// Session Tokens
// ============================================================================

/// Generate an opaque session token: 32 bytes of OS randomness, base64url.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a session token with SHA-256 for deterministic storage and lookup.
/// bcrypt is intentionally NOT used here because it is non-deterministic —
/// the same input produces different hashes on every call, making DB lookups
/// by hash impossible without scanning all rows.
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Insert a fresh session row for the user and return the raw token.
pub async fn create_session(pool: &PgPool, user_id: i64) -> AppResult<String> {
    let token = generate_session_token();

    sqlx::query(
        "INSERT INTO sessions (user_id, token_hash, expires_at)
         VALUES ($1, $2, $3)",
    )
    .bind(user_id)
    .bind(hash_session_token(&token))
    .bind(Utc::now() + Duration::days(SESSION_TTL_DAYS))
    .execute(pool)
    .await?;

    Ok(token)
}

/// Delete the session identified by the raw token. Idempotent: revoking a
/// token that is already invalid or expired is not an error.
pub async fn revoke_session(pool: &PgPool, token: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_session_token(token))
        .execute(pool)
        .await?;

    Ok(())
}

/// Resolve a raw session token to its live user.
///
/// Returns `None` for unknown tokens, expired sessions, and sessions whose
/// account has since been ghosted. Cookie and query-parameter tokens both
/// come through here — there is exactly one validation path.
pub async fn resolve_session(pool: &PgPool, token: &str) -> AppResult<Option<(i64, String)>> {
    let row: Option<(i64, String)> = sqlx::query_as(
        "SELECT u.id, u.username
         FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token_hash = $1 AND s.expires_at > NOW() AND u.deleted = FALSE",
    )
    .bind(hash_session_token(token))
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

// ============================================================================
// Password Hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, 12).map_err(|e| {
        tracing::error!("Failed to hash password: {:?}", e);
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!("Failed to verify password: {:?}", e);
        AppError::Internal
    })
}

// ============================================================================
// Auth Middleware
// ============================================================================

/// Authenticated caller resolved from a valid session token.
///
/// The token is accepted from the `hermes_session` cookie or, for WebSocket
/// clients that cannot set cookies, the `token` query parameter.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, preventing callers from forging an `AuthUser` via struct literal.
pub struct AuthUser {
    user_id: i64,
    username: String,
}

impl AuthUser {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

/// Pull the session token from request parts: cookie first, then `?token=`.
pub fn token_from_parts(parts: &Parts, jar: &CookieJar) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_owned());
    }

    // Tokens are base64url, so no percent-decoding is needed here.
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(ToOwned::to_owned)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = parts.extract::<CookieJar>().await.unwrap_or_default();

        let token = token_from_parts(parts, &jar)
            .ok_or_else(|| auth_error("Missing session token"))?;

        let resolved = resolve_session(&state.pool, &token)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Session lookup failed");
                auth_error("Invalid or expired session")
            })?
            .ok_or_else(|| auth_error("Invalid or expired session"))?;

        let (user_id, username) = resolved;
        Ok(AuthUser { user_id, username })
    }
}

// ============================================================================
// Tests
// ============================================================================
