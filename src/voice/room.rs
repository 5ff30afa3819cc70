use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use webrtc::{
    api::media_engine::MIME_TYPE_OPUS,
    ice_transport::ice_candidate::RTCIceCandidate,
    peer_connection::{
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{rtp_codec::RTCRtpCodecCapability, rtp_sender::RTCRtpSender},
    track::{
        track_local::{track_local_static_rtp::TrackLocalStaticRTP, TrackLocal, TrackLocalWriter},
        track_remote::TrackRemote,
    },
};

use crate::broker::events::{Event, EVENT_ICE_CANDIDATE};

/// Signaling lifecycle of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// PeerConnection exists but the peer is not yet in a room.
    Connecting,
    /// In the room, exchanging SDP/ICE over the signaling socket.
    Signaling,
    /// ICE completed; media is flowing.
    Connected,
    /// Torn down; the peer is no longer part of any room.
    Closed,
}

/// One participant in a voice room.
///
/// Owns the server-side `RTCPeerConnection`, the outbound half of its
/// signaling socket, and two link maps:
///
/// - `egress`: per-subscriber local tracks replicating *this* peer's audio,
///   written by the ingress forward loop, attached to other peers'
///   connections;
/// - `forwards`: the RTP senders other peers' tracks occupy on *this* peer's
///   connection, kept so they can be detached when those peers leave.
///
/// Media callbacks run on webrtc-owned tasks and only ever touch the peer's
/// own maps through short `std::sync::Mutex` sections — never the room or
/// manager locks.
pub struct Peer {
    pub user_id: i64,
    /// Distinguishes reconnections: a stale session's cleanup must not tear
    /// down the peer that replaced it.
    pub conn_id: u64,
    pub pc: Arc<RTCPeerConnection>,
    signal_tx: mpsc::Sender<String>,
    close_signal: mpsc::Sender<()>,
    state: StdMutex<PeerState>,
    egress: StdMutex<HashMap<i64, Arc<TrackLocalStaticRTP>>>,
    forwards: StdMutex<HashMap<i64, Arc<RTCRtpSender>>>,
}

impl Peer {
    pub fn new(
        user_id: i64,
        conn_id: u64,
        pc: Arc<RTCPeerConnection>,
        signal_tx: mpsc::Sender<String>,
        close_signal: mpsc::Sender<()>,
    ) -> Self {
        Peer {
            user_id,
            conn_id,
            pc,
            signal_tx,
            close_signal,
            state: StdMutex::new(PeerState::Connecting),
            egress: StdMutex::new(HashMap::new()),
            forwards: StdMutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().expect("peer state poisoned")
    }

    pub fn set_state(&self, state: PeerState) {
        *self.state.lock().expect("peer state poisoned") = state;
    }

    /// Serialize and queue an envelope on the signaling socket.
    pub async fn send_event(&self, event: &str, data: Value) {
        match serde_json::to_string(&Event::new(event, data)) {
            Ok(payload) => {
                let _ = self.signal_tx.send(payload).await;
            }
            Err(e) => {
                tracing::error!(
                    user_id = self.user_id,
                    error = ?e,
                    "Failed to serialize signaling event; this is a programming error"
                );
            }
        }
    }

    /// Ask the owning signaling session to shut down. Used by the connection
    /// state callback on failure and by eviction when the same user opens a
    /// second signaling socket.
    pub fn request_close(&self) {
        let _ = self.close_signal.try_send(());
    }

    /// Install the webrtc callbacks. Separate from `new` because the
    /// callbacks need a `Weak` back-reference to the finished `Arc`.
    pub fn register_callbacks(self: &Arc<Self>) {
        // Trickle ICE: every locally gathered candidate goes straight out on
        // the signaling socket.
        let candidate_peer = Arc::downgrade(self);
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let peer = candidate_peer.clone();
                Box::pin(async move {
                    let (Some(peer), Some(candidate)) = (peer.upgrade(), candidate) else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            peer.send_event(EVENT_ICE_CANDIDATE, json!({ "candidate": init }))
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!(
                                user_id = peer.user_id,
                                error = ?e,
                                "Failed to serialize local ICE candidate"
                            );
                        }
                    }
                })
            }));

        let state_peer = Arc::downgrade(self);
        self.pc.on_peer_connection_state_change(Box::new(
            move |pc_state: RTCPeerConnectionState| {
                let peer = state_peer.clone();
                Box::pin(async move {
                    let Some(peer) = peer.upgrade() else { return };
                    match pc_state {
                        RTCPeerConnectionState::Connected => {
                            peer.set_state(PeerState::Connected);
                        }
                        RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Closed => {
                            tracing::debug!(
                                user_id = peer.user_id,
                                state = %pc_state,
                                "PeerConnection ended; requesting session close"
                            );
                            peer.request_close();
                        }
                        _ => {}
                    }
                })
            },
        ));

        // Ingress: fan each RTP packet from this peer out to every
        // subscriber's egress track. The loop runs on its own task so the
        // webrtc event loop is never blocked.
        let track_peer = Arc::downgrade(self);
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let peer = track_peer.clone();
                Box::pin(async move {
                    let Some(peer) = peer.upgrade() else { return };
                    tokio::spawn(peer.forward_ingress(track));
                })
            },
        ));
    }

    /// Read RTP from the peer's ingress track and write each packet to the
    /// current snapshot of egress tracks. Subscribers that joined after a
    /// packet was read simply miss it; closed sinks are skipped.
    async fn forward_ingress(self: Arc<Self>, track: Arc<TrackRemote>) {
        tracing::debug!(user_id = self.user_id, ssrc = track.ssrc(), "Ingress track started");

        loop {
            let packet = match track.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(_) => break,
            };

            // Snapshot under the short lock, write outside it.
            let sinks: Vec<Arc<TrackLocalStaticRTP>> = self
                .egress
                .lock()
                .expect("peer egress poisoned")
                .values()
                .cloned()
                .collect();

            for sink in sinks {
                match sink.write_rtp(&packet).await {
                    Ok(_) | Err(webrtc::Error::ErrClosedPipe) => {}
                    Err(e) => {
                        tracing::debug!(
                            user_id = self.user_id,
                            error = ?e,
                            "Dropping RTP packet on egress write failure"
                        );
                    }
                }
            }
        }

        tracing::debug!(user_id = self.user_id, "Ingress track ended");
    }

    /// Apply the client's offer and produce the local answer SDP.
    pub async fn apply_offer(&self, sdp: String) -> Result<String, webrtc::Error> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.pc.set_remote_description(offer).await?;

        // Trickle ICE: the answer goes out immediately; candidates follow on
        // their own as the agent gathers them.
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;

        Ok(answer.sdp)
    }

    /// Detach every artifact linking this peer to `gone_user`: the RTP sender
    /// carrying their audio into this connection, and the egress track that
    /// was carrying this peer's audio to them.
    async fn drop_link(&self, gone_user: i64) {
        let sender = self
            .forwards
            .lock()
            .expect("peer forwards poisoned")
            .remove(&gone_user);

        if let Some(sender) = sender {
            if let Err(e) = self.pc.remove_track(&sender).await {
                tracing::debug!(
                    user_id = self.user_id,
                    gone_user,
                    error = ?e,
                    "Failed to remove egress track from connection"
                );
            }
        }

        self.egress
            .lock()
            .expect("peer egress poisoned")
            .remove(&gone_user);
    }

    /// Close the PeerConnection and notify the signaling session.
    pub async fn teardown(&self) {
        self.set_state(PeerState::Closed);
        if let Err(e) = self.pc.close().await {
            tracing::debug!(user_id = self.user_id, error = ?e, "PeerConnection close failed");
        }
        self.request_close();
    }

    #[cfg(test)]
    pub fn egress_count(&self) -> usize {
        self.egress.lock().unwrap().len()
    }

    #[cfg(test)]
    pub fn forward_count(&self) -> usize {
        self.forwards.lock().unwrap().len()
    }
}

/// In-memory state of one voice channel: the set of live peers.
///
/// The room owns its peer map behind a `tokio::sync::Mutex` because linking
/// peers awaits webrtc operations while the map is held; media callbacks never
/// take this lock.
pub struct Room {
    pub server_id: i64,
    pub channel_id: i64,
    pub(super) peers: Mutex<HashMap<i64, Arc<Peer>>>,
}

impl Room {
    pub fn new(server_id: i64, channel_id: i64) -> Self {
        Room {
            server_id,
            channel_id,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Add a peer to the room, wiring audio both ways with every existing
    /// peer. At most one peer per user: a prior connection from the same user
    /// is unlinked and returned so the caller can tear it down — mobile
    /// clients routinely reconnect before the old socket's close is detected.
    pub async fn add_peer(&self, peer: Arc<Peer>) -> Result<Option<Arc<Peer>>, webrtc::Error> {
        let mut peers = self.peers.lock().await;

        let evicted = peers.remove(&peer.user_id);
        if let Some(ref old) = evicted {
            for other in peers.values() {
                other.drop_link(old.user_id).await;
            }
        }

        for other in peers.values() {
            link(&peer, other).await?;
            link(other, &peer).await?;
        }

        peers.insert(peer.user_id, peer);
        Ok(evicted)
    }

    /// Remove a peer if (and only if) the connection generation matches,
    /// unlinking it from every remaining peer. Returns the removed peer and
    /// whether the room is now empty.
    pub async fn remove_peer(&self, user_id: i64, conn_id: u64) -> (Option<Arc<Peer>>, bool) {
        let mut peers = self.peers.lock().await;

        let matches = peers
            .get(&user_id)
            .map_or(false, |p| p.conn_id == conn_id);
        if !matches {
            return (None, peers.is_empty());
        }

        let peer = peers.remove(&user_id);
        for other in peers.values() {
            other.drop_link(user_id).await;
        }

        (peer, peers.is_empty())
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }
}

/// Wire one direction: create a local track replicating `source`'s audio and
/// attach it to `sink`'s connection.
async fn link(source: &Arc<Peer>, sink: &Arc<Peer>) -> Result<(), webrtc::Error> {
    let track = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        format!("audio-{}", source.user_id),
        format!("peer-{}", source.user_id),
    ));

    let sender = sink
        .pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await?;

    // Drain RTCP on the sender so its interceptors keep running.
    let rtcp_sender = Arc::clone(&sender);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while rtcp_sender.read(&mut buf).await.is_ok() {}
    });

    sink.forwards
        .lock()
        .expect("peer forwards poisoned")
        .insert(source.user_id, sender);
    source
        .egress
        .lock()
        .expect("peer egress poisoned")
        .insert(sink.user_id, track);

    Ok(())
}
