use std::sync::Arc;

use sqlx::PgPool;

use crate::broker::Broker;
use crate::voice::VoiceManager;

/// Shared application state passed to all handlers and extractors.
///
/// `Broker` is cheaply cloneable (it wraps an `Arc` internally), so cloning
/// `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Per-text-channel WebSocket fan-out registry.
    pub broker: Broker,
    /// Voice room manager: per-voice-channel peer connections and forwarding.
    pub voice: Arc<VoiceManager>,
}
