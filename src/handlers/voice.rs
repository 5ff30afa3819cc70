use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use super::shared::{fetch_channel, require_member};
use crate::{
    auth::AuthUser,
    broker::events::{EVENT_VOICE_USER_JOINED, EVENT_VOICE_USER_LEFT},
    error::{AppError, AppResult},
    models::{Channel, ChannelKind},
    state::AppState,
};

/// Returns `AppError::Validation` (HTTP 400) if the channel's type is not
/// VOICE.
fn require_voice_channel(channel: &Channel) -> AppResult<()> {
    if channel.kind != ChannelKind::Voice {
        return Err(AppError::Validation("Channel is not a voice channel".into()));
    }
    Ok(())
}

/// Publish a voice presence event to the channel's text-event subscribers.
///
/// Ids are decimal strings in these payloads so JavaScript clients keep full
/// 64-bit precision.
pub fn publish_presence(state: &AppState, event: &str, channel_id: i64, user_id: i64) {
    state.broker.publish(
        channel_id,
        event,
        json!({
            "user_id": user_id.to_string(),
            "channel_id": channel_id.to_string(),
        }),
    );
}

/// POST /api/servers/:id/channels/:channel_id/voice/join — announce voice
/// presence (members only).
///
/// This is metadata only: clients call it before opening the voice WebSocket
/// so member lists update promptly. Media is established exclusively over
/// the signaling socket.
pub async fn join_voice_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
) -> AppResult<Json<Value>> {
    require_member(&state.pool, server_id, auth.user_id()).await?;
    let channel = fetch_channel(&state.pool, server_id, channel_id).await?;
    require_voice_channel(&channel)?;

    publish_presence(&state, EVENT_VOICE_USER_JOINED, channel_id, auth.user_id());

    Ok(Json(json!({ "message": "Successfully joined voice channel" })))
}

/// POST /api/servers/:id/channels/:channel_id/voice/leave — announce voice
/// departure (members only).
pub async fn leave_voice_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
) -> AppResult<Json<Value>> {
    require_member(&state.pool, server_id, auth.user_id()).await?;
    let channel = fetch_channel(&state.pool, server_id, channel_id).await?;
    require_voice_channel(&channel)?;

    publish_presence(&state, EVENT_VOICE_USER_LEFT, channel_id, auth.user_id());

    Ok(Json(json!({ "message": "Successfully left voice channel" })))
}
