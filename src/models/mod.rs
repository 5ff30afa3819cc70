use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub status: String,
    pub avatar_url: Option<String>,
    pub password_hash: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public profile shape: what any authenticated user may see about another.
#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub status: String,
    pub avatar_url: Option<String>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            status: user.status,
            avatar_url: user.avatar_url,
        }
    }
}

/// Self-profile shape returned by `/users/@me`; the only place `email`
/// is ever serialized.
#[derive(Debug, Serialize)]
pub struct PrivateUserDto {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub status: String,
    pub avatar_url: Option<String>,
}

impl From<User> for PrivateUserDto {
    fn from(user: User) -> Self {
        PrivateUserDto {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            status: user.status,
            avatar_url: user.avatar_url,
        }
    }
}

// ============================================================================
// Server Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub icon_url: Option<String>,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Membership {
    pub user_id: i64,
    pub server_id: i64,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

// ============================================================================
// Channel Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "channel_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelKind {
    Text,
    Voice,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Channel {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Message Models
// ============================================================================

/// Author view nested inside every message response and broadcast.
///
/// Ghosted authors still resolve here: their row survives account deletion
/// with `username = ghost_<id>` and `display_name = "Deleted User"`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorDto {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub id: i64,
    pub channel_id: i64,
    pub content: String,
    pub author: AuthorDto,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Flat row produced by the message + author JOIN queries.
#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub channel_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub author_id: i64,
    pub author_username: String,
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
}

impl From<MessageRow> for MessageDto {
    fn from(row: MessageRow) -> Self {
        MessageDto {
            id: row.id,
            channel_id: row.channel_id,
            content: row.content,
            created_at: row.created_at,
            edited_at: row.edited_at,
            author: AuthorDto {
                id: row.author_id,
                username: row.author_username,
                display_name: row.author_display_name,
                avatar_url: row.author_avatar_url,
            },
        }
    }
}

