use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::{
    auth::AuthUser,
    error::AppResult,
    handlers::shared::{fetch_channel, require_member},
    state::AppState,
};

/// Interval between server-initiated pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A subscriber that produces no traffic (pong or otherwise) for this long
/// is considered dead and evicted.
const READ_DEADLINE: Duration = Duration::from_secs(75);

/// GET /api/servers/:server_id/channels/:channel_id/messages/ws
///
/// Upgrade to the text-channel event stream. Authentication (cookie or
/// `?token=`) and active membership of the parent server are verified before
/// the upgrade is accepted; voice channels are subscribable too, since voice
/// presence events fan out under the voice channel's id.
pub async fn message_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    auth: AuthUser,
    Path((server_id, channel_id)): Path<(i64, i64)>,
) -> AppResult<Response> {
    require_member(&state.pool, server_id, auth.user_id()).await?;
    fetch_channel(&state.pool, server_id, channel_id).await?;

    let user_id = auth.user_id();
    Ok(ws.on_upgrade(move |socket| run_subscriber(socket, state, channel_id, user_id)))
}

/// Pump events from the broker queue to the socket until the subscriber
/// disconnects, errors, misses its read deadline, or is evicted.
///
/// Deregistration happens exactly once: this function owns the subscription
/// and every exit path falls through to the single `unsubscribe` below.
async fn run_subscriber(socket: WebSocket, state: AppState, channel_id: i64, user_id: i64) {
    let mut subscription = state.broker.subscribe(channel_id);
    let (mut sender, mut receiver) = socket.split();

    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    tracing::debug!(channel_id, user_id, "Subscriber connected");

    loop {
        tokio::select! {
            outbound = subscription.rx.recv() => {
                match outbound {
                    Some(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // Send half dropped: the broker evicted us for falling behind.
                    None => {
                        tracing::warn!(channel_id, user_id, "Subscriber evicted by broker");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_activity.elapsed() > READ_DEADLINE {
                    tracing::debug!(channel_id, user_id, "Subscriber missed read deadline");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    // Any frame counts as liveness; the stream is server→client
                    // only, so client text frames are ignored rather than fatal.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_activity = Instant::now(),
                    Some(Err(e)) => {
                        tracing::debug!(
                            channel_id,
                            user_id,
                            error = ?e,
                            "WebSocket receive error; closing connection"
                        );
                        break;
                    }
                }
            }
        }
    }

    state.broker.unsubscribe(channel_id, subscription.id);
    tracing::debug!(channel_id, user_id, "Subscriber disconnected");
}
