use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for every realtime message, on both the text-channel stream and
/// the voice signaling socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    pub data: Value,
}

impl Event {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_owned(),
            data,
        }
    }
}

// ── Text-channel event type strings ──────────────────────────────────────────

/// Payload: full message view including nested author.
pub const EVENT_MESSAGE_CREATE: &str = "MESSAGE_CREATE";
/// Payload: full message view including nested author.
pub const EVENT_MESSAGE_UPDATE: &str = "MESSAGE_UPDATE";
/// Payload: `{id}` with the id as a decimal string, so JavaScript clients
/// never lose precision on 64-bit ids.
pub const EVENT_MESSAGE_DELETE: &str = "MESSAGE_DELETE";
/// Payload: `{user_id, channel_id}`, both decimal strings.
pub const EVENT_VOICE_USER_JOINED: &str = "VOICE_USER_JOINED";
/// Payload: `{user_id, channel_id}`, both decimal strings.
pub const EVENT_VOICE_USER_LEFT: &str = "VOICE_USER_LEFT";

// ── Voice signaling event type strings ───────────────────────────────────────

/// Both directions: `{candidate}` carrying a trickle ICE candidate.
pub const EVENT_ICE_CANDIDATE: &str = "ICE_CANDIDATE";
/// Client → server: `{type: "offer", sdp}`.
pub const EVENT_WEBRTC_OFFER: &str = "WEBRTC_OFFER";
/// Server → client: `{type: "answer", sdp}`, exactly one per accepted offer.
pub const EVENT_WEBRTC_ANSWER: &str = "WEBRTC_ANSWER";
