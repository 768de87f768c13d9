//! WebRTC-Engine auf Basis von webrtc-rs
//!
//! Verwaltet genau eine RTCPeerConnection pro Session. Lokale Tracks
//! werden als RTP-Tracks (Opus/VP8) angemeldet; das Befüllen mit
//! Mediendaten übernimmt die jeweilige MediaSource.

use super::engine::{EngineEvent, EngineFactory, NegotiationEngine, NegotiationError, PeerState};
use crate::config::IceServerConfig;
use crate::media::{RemoteTrack, TrackKind, TrackSet};
use crate::signaling::IceCandidate;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

const AUDIO_CLOCK_RATE: u32 = 48000;
const VIDEO_CLOCK_RATE: u32 = 90000;

fn webrtc_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::WebRTC(e.to_string())
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<&IceServerConfig> for RTCIceServer {
    fn from(server: &IceServerConfig) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        }
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: AUDIO_CLOCK_RATE,
            channels: 1,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: VIDEO_CLOCK_RATE,
            ..Default::default()
        },
    }
}

// ============================================================================
// RTC ENGINE
// ============================================================================

pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
    participant: String,
    event_tx: broadcast::Sender<EngineEvent>,
    closed: AtomicBool,
}

impl RtcEngine {
    /// Erstellt eine neue Peer Connection
    pub async fn new(
        participant: &str,
        ice_servers: &[IceServerConfig],
        capacity: usize,
    ) -> Result<Self, NegotiationError> {
        // Media Engine mit Standard-Codecs (Opus, VP8, ...)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(webrtc_error)?);
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self::setup_handlers(&pc, &event_tx);

        Ok(Self {
            pc,
            participant: participant.to_string(),
            event_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Registriert Event Handler für die Peer Connection
    fn setup_handlers(pc: &Arc<RTCPeerConnection>, event_tx: &broadcast::Sender<EngineEvent>) {
        let state_tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {:?}", s);
            let _ = state_tx.send(EngineEvent::StateChanged(peer_state(s)));
            Box::pin(async {})
        }));

        let candidate_tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(EngineEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let track_tx = event_tx.clone();
        pc.on_track(Box::new(move |track, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                tracing::info!("Received remote {} track: {:?}", kind, track.codec());
                let _ = track_tx.send(EngineEvent::RemoteTrack {
                    participant: track.stream_id(),
                    track: RemoteTrack {
                        id: track.id(),
                        kind,
                    },
                });
            }
            Box::pin(async {})
        }));
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationEngine for RtcEngine {
    async fn attach_tracks(&self, tracks: &TrackSet) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        for local in tracks.iter() {
            let rtp_track = Arc::new(TrackLocalStaticRTP::new(
                codec_for(local.kind()),
                local.id().to_string(),
                self.participant.clone(),
            ));
            self.pc
                .add_track(rtp_track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(webrtc_error)?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, NegotiationError> {
        self.ensure_open()?;
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(webrtc_error)?;
        Ok(offer.sdp)
    }

    async fn accept_offer(&self, sdp: String) -> Result<String, NegotiationError> {
        self.ensure_open()?;
        let offer =
            RTCSessionDescription::offer(sdp).map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(webrtc_error)?;

        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(webrtc_error)?;
        Ok(answer.sdp)
    }

    async fn accept_answer(&self, sdp: String) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let answer =
            RTCSessionDescription::answer(sdp).map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(webrtc_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| NegotiationError::Candidate(e.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pc.close().await.map_err(webrtc_error)
    }
}

impl std::fmt::Debug for RtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcEngine")
            .field("participant", &self.participant)
            .field("state", &self.pc.connection_state())
            .finish()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

#[derive(Debug, Clone)]
pub struct RtcEngineFactory {
    ice_servers: Vec<IceServerConfig>,
    capacity: usize,
}

impl RtcEngineFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>, capacity: usize) -> Self {
        Self {
            ice_servers,
            capacity,
        }
    }
}

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    async fn create(
        &self,
        participant: &str,
    ) -> Result<Arc<dyn NegotiationEngine>, NegotiationError> {
        let engine = RtcEngine::new(participant, &self.ice_servers, self.capacity).await?;
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LocalTrack, MediaError, MediaSource};

    struct Silent(TrackKind);

    impl MediaSource for Silent {
        fn kind(&self) -> TrackKind {
            self.0
        }

        fn label(&self) -> String {
            "silent".to_string()
        }

        fn set_enabled(&self, _enabled: bool) {}

        fn stop(&self) -> Result<(), MediaError> {
            Ok(())
        }
    }

    fn tracks() -> TrackSet {
        TrackSet::new(vec![
            LocalTrack::new(Arc::new(Silent(TrackKind::Audio))),
            LocalTrack::new(Arc::new(Silent(TrackKind::Video))),
        ])
    }

    #[tokio::test]
    async fn offer_answer_sets_descriptions_on_both_sides() {
        let a = RtcEngine::new("alice", &[], 16).await.unwrap();
        let b = RtcEngine::new("bob", &[], 16).await.unwrap();
        a.attach_tracks(&tracks()).await.unwrap();
        b.attach_tracks(&tracks()).await.unwrap();

        let offer = a.create_offer().await.unwrap();
        assert!(offer.contains("m=audio"));
        assert!(offer.contains("m=video"));
        assert!(!b.has_remote_description().await);

        let answer = b.accept_offer(offer).await.unwrap();
        assert!(b.has_remote_description().await);

        a.accept_answer(answer).await.unwrap();
        assert!(a.has_remote_description().await);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn garbage_offer_is_rejected() {
        let engine = RtcEngine::new("alice", &[], 16).await.unwrap();
        assert!(engine.accept_offer("not an sdp".to_string()).await.is_err());
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn zero_event_capacity_still_builds_an_engine() {
        let engine = RtcEngine::new("alice", &[], 0).await.unwrap();
        let _events = engine.subscribe();
        engine.attach_tracks(&tracks()).await.unwrap();
        assert!(engine.create_offer().await.unwrap().contains("m=audio"));
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_engine_refuses_work_and_closes_once() {
        let engine = RtcEngine::new("alice", &[], 16).await.unwrap();
        engine.close().await.unwrap();
        engine.close().await.unwrap();
        assert_eq!(engine.create_offer().await, Err(NegotiationError::Closed));
    }
}
