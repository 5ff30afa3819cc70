use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use super::Peer;
use crate::{
    auth::AuthUser,
    broker::events::{
        Event, EVENT_ICE_CANDIDATE, EVENT_VOICE_USER_JOINED, EVENT_VOICE_USER_LEFT,
        EVENT_WEBRTC_ANSWER, EVENT_WEBRTC_OFFER,
    },
    error::{AppError, AppResult},
    handlers::shared::{fetch_channel, require_member},
    handlers::voice::publish_presence,
    models::ChannelKind,
    state::AppState,
};

/// Bound on queued outbound signaling messages per peer.
const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// GET /api/servers/:server_id/channels/:channel_id/voice/ws
///
/// Upgrade to the WebRTC signaling stream for a voice channel. Authentication
/// and active membership are checked before the upgrade; the channel must be
/// of type VOICE.
pub async fn voice_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
) -> AppResult<Response> {
    require_member(&state.pool, server_id, auth.user_id()).await?;
    let channel = fetch_channel(&state.pool, server_id, channel_id).await?;
    if channel.kind != ChannelKind::Voice {
        return Err(AppError::Validation("Channel is not a voice channel".into()));
    }

    let user_id = auth.user_id();
    Ok(ws.on_upgrade(move |socket| run_voice_session(socket, state, server_id, channel_id, user_id)))
}

/// Drive one peer's signaling session: join the room, relay envelopes in both
/// directions, and tear the peer down when anything ends the connection.
async fn run_voice_session(
    socket: WebSocket,
    state: AppState,
    server_id: i64,
    channel_id: i64,
    user_id: i64,
) {
    let (signal_tx, mut signal_rx) = mpsc::channel::<String>(SIGNAL_QUEUE_CAPACITY);
    let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

    let peer = match state
        .voice
        .join(server_id, channel_id, user_id, signal_tx, close_tx)
        .await
    {
        Ok(peer) => peer,
        Err(e) => {
            // Dropping the socket here closes it before any signaling happened.
            tracing::error!(
                user_id,
                channel_id,
                error = ?e,
                "Failed to create voice peer; closing signaling socket"
            );
            return;
        }
    };

    publish_presence(&state, EVENT_VOICE_USER_JOINED, channel_id, user_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outbound = signal_rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // PeerConnection failure, signaling error, or eviction by a newer
            // connection from the same user.
            _ = close_rx.recv() => break,
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => handle_signal(&peer, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(
                            user_id,
                            channel_id,
                            error = ?e,
                            "Voice WebSocket receive error; closing session"
                        );
                        break;
                    }
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;

    // A stale session (evicted by a reconnect) removes nothing and must not
    // announce a departure the room never saw.
    let removed = state
        .voice
        .leave(server_id, channel_id, user_id, peer.conn_id)
        .await;
    if removed {
        publish_presence(&state, EVENT_VOICE_USER_LEFT, channel_id, user_id);
    }
}

/// Process one inbound signaling envelope.
///
/// Unparseable frames are ignored rather than fatal; failures applying an
/// offer end the session (the client cannot recover a broken negotiation).
async fn handle_signal(peer: &Arc<Peer>, text: &str) {
    let Ok(envelope) = serde_json::from_str::<Event>(text) else {
        return;
    };

    match envelope.event.as_str() {
        EVENT_WEBRTC_OFFER => {
            let Some(sdp) = envelope.data.get("sdp").and_then(|v| v.as_str()) else {
                tracing::warn!(user_id = peer.user_id, "WEBRTC_OFFER without sdp");
                return;
            };

            match peer.apply_offer(sdp.to_owned()).await {
                Ok(answer_sdp) => {
                    peer.send_event(
                        EVENT_WEBRTC_ANSWER,
                        json!({ "type": "answer", "sdp": answer_sdp }),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = peer.user_id,
                        error = ?e,
                        "Failed to apply offer; closing session"
                    );
                    peer.request_close();
                }
            }
        }
        EVENT_ICE_CANDIDATE => {
            let Some(init) = parse_candidate(&envelope.data) else {
                tracing::warn!(user_id = peer.user_id, "Malformed ICE candidate");
                return;
            };

            if let Err(e) = peer.pc.add_ice_candidate(init).await {
                tracing::warn!(
                    user_id = peer.user_id,
                    error = ?e,
                    "Failed to add remote ICE candidate"
                );
            }
        }
        other => {
            tracing::debug!(user_id = peer.user_id, event = other, "Ignoring signaling event");
        }
    }
}

/// Accept both candidate shapes clients send: a full init object or a bare
/// candidate string.
fn parse_candidate(data: &serde_json::Value) -> Option<RTCIceCandidateInit> {
    let candidate = data.get("candidate")?;

    if let Some(s) = candidate.as_str() {
        return Some(RTCIceCandidateInit {
            candidate: s.to_owned(),
            ..Default::default()
        });
    }

    serde_json::from_value(candidate.clone()).ok()
}
