pub mod room;
pub mod signaling;

pub use room::{Peer, PeerState, Room};
pub use signaling::voice_stream_handler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        APIBuilder, API,
    },
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    peer_connection::configuration::RTCConfiguration,
};

/// Voice room manager: the SFU side of the hub.
///
/// Lazily materializes a [`Room`] per `(server_id, channel_id)` voice channel
/// and owns the shared webrtc [`API`]. Rooms have no persistent
/// representation; a room with zero peers is garbage-collected.
pub struct VoiceManager {
    api: API,
    rooms: Mutex<HashMap<(i64, i64), Arc<Room>>>,
    next_conn_id: AtomicU64,
}

impl VoiceManager {
    pub fn new() -> Result<Self, webrtc::Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(VoiceManager {
            api,
            rooms: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    fn rtc_config() -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Create a peer for `user_id` in the channel's room, evicting any prior
    /// peer the same user still has there. Returns the live peer whose
    /// lifetime the signaling session now owns.
    pub async fn join(
        &self,
        server_id: i64,
        channel_id: i64,
        user_id: i64,
        signal_tx: mpsc::Sender<String>,
        close_signal: mpsc::Sender<()>,
    ) -> Result<Arc<Peer>, webrtc::Error> {
        let key = (server_id, channel_id);
        let room = {
            let mut rooms = self.rooms.lock().await;
            Arc::clone(
                rooms
                    .entry(key)
                    .or_insert_with(|| Arc::new(Room::new(server_id, channel_id))),
            )
        };

        let pc = Arc::new(self.api.new_peer_connection(Self::rtc_config()).await?);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer::new(user_id, conn_id, pc, signal_tx, close_signal));
        peer.register_callbacks();

        let evicted = room.add_peer(Arc::clone(&peer)).await?;
        if let Some(old) = evicted {
            tracing::info!(
                user_id,
                channel_id,
                "Evicting prior voice connection for reconnecting user"
            );
            old.teardown().await;
        }

        // A concurrent leave may have garbage-collected the room between our
        // map lookup and add_peer; re-registering the same Arc heals that.
        self.rooms
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Arc::clone(&room));

        peer.set_state(PeerState::Signaling);
        tracing::info!(user_id, server_id, channel_id, "Peer joined voice room");

        Ok(peer)
    }

    /// Remove the peer if this connection generation still owns it, closing
    /// its PeerConnection and garbage-collecting the room when it empties.
    /// Returns whether a peer was actually removed — a stale session whose
    /// user has since reconnected removes nothing.
    pub async fn leave(&self, server_id: i64, channel_id: i64, user_id: i64, conn_id: u64) -> bool {
        let key = (server_id, channel_id);
        let room = { self.rooms.lock().await.get(&key).cloned() };
        let Some(room) = room else { return false };

        let (removed, empty) = room.remove_peer(user_id, conn_id).await;

        if let Some(peer) = &removed {
            peer.teardown().await;
            tracing::info!(user_id, server_id, channel_id, "Peer left voice room");
        }

        if empty {
            self.gc_room(key).await;
        }

        removed.is_some()
    }

    /// Drop the room from the registry if it is still empty. Checked under
    /// both locks so a joiner holding the room Arc cannot be stranded.
    async fn gc_room(&self, key: (i64, i64)) {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(&key) {
            if room.peers.lock().await.is_empty() {
                rooms.remove(&key);
                tracing::debug!(
                    server_id = key.0,
                    channel_id = key.1,
                    "Garbage-collected empty voice room"
                );
            }
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
