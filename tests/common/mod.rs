//! Gemeinsame Test-Fakes für Session- und Signaling-Szenarien
//!
//! - Zählende Geräte und Medienquellen
//! - Eine geskriptete NegotiationEngine samt Factory
//! - Ein geskripteter Relay-Client
//! - Connectoren zum In-Memory-Hub und zu einem rohen Test-Server

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peer_call::config::SessionConfig;
use peer_call::media::{
    MediaAccessDenied, MediaDevices, MediaError, MediaSource, RemoteTrack, TrackKind, TrackSet,
};
use peer_call::negotiation::{
    EngineEvent, EngineFactory, NegotiationEngine, NegotiationError, PeerState,
};
use peer_call::rendezvous::RendezvousHub;
use peer_call::session::{Backends, CallParameters, CallSession, ConnectionState};
use peer_call::signaling::{
    IceCandidate, SignalingChannel, SignalingConnector, SignalingError, SignalingMessage,
};
use peer_call::strategy::{RelayClient, RelayError, RelayEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// MEDIA
// ============================================================================

pub struct FakeSource {
    kind: TrackKind,
    enabled: AtomicBool,
    stops: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl MediaSource for FakeSource {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> String {
        format!("fake {}", self.kind)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) -> Result<(), MediaError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Zählt Öffnungen und Stopps pro Geräteart
#[derive(Default)]
pub struct FakeDevices {
    opened: AtomicUsize,
    audio_stops: Arc<AtomicUsize>,
    video_stops: Arc<AtomicUsize>,
    sources: Mutex<Vec<Arc<FakeSource>>>,
    deny: Option<MediaAccessDenied>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying(denied: MediaAccessDenied) -> Arc<Self> {
        Arc::new(Self {
            deny: Some(denied),
            ..Default::default()
        })
    }

    /// `open` wartet, bis der Test Permits freigibt
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn stops(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Audio => self.audio_stops.load(Ordering::SeqCst),
            TrackKind::Video => self.video_stops.load(Ordering::SeqCst),
        }
    }

    pub fn source(&self, kind: TrackKind) -> Option<Arc<FakeSource>> {
        self.sources.lock().iter().find(|s| s.kind == kind).cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open(&self, kind: TrackKind) -> Result<Arc<dyn MediaSource>, MediaAccessDenied> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| MediaAccessDenied::NoDevice(kind))?;
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        if let Some(denied) = self.deny.as_ref().filter(|d| denied_kind(d) == kind) {
            return Err(denied.clone());
        }

        let stops = match kind {
            TrackKind::Audio => Arc::clone(&self.audio_stops),
            TrackKind::Video => Arc::clone(&self.video_stops),
        };
        let source = Arc::new(FakeSource {
            kind,
            enabled: AtomicBool::new(true),
            stops,
        });
        self.sources.lock().push(Arc::clone(&source));
        Ok(source)
    }
}

fn denied_kind(denied: &MediaAccessDenied) -> TrackKind {
    match denied {
        MediaAccessDenied::PermissionDenied(kind) | MediaAccessDenied::NoDevice(kind) => *kind,
        MediaAccessDenied::DeviceFailure { kind, .. } => *kind,
    }
}

// ============================================================================
// NEGOTIATION ENGINE
// ============================================================================

/// Geteilte Sicht aller Fake-Engines: welches SDP gehört zu welchem Teilnehmer
#[derive(Default)]
pub struct EngineStats {
    directory: Mutex<HashMap<String, String>>,
    pub offers: AtomicUsize,
    pub answers: AtomicUsize,
    pub closes: AtomicUsize,
}

/// Engine ohne Netzwerk
///
/// Meldet zwei lokale Candidates pro lokaler Description, beide Remote-Tracks
/// sobald die Remote Description gesetzt ist, und `Connected` nach dem
/// ersten angewendeten Candidate.
pub struct FakeEngine {
    participant: String,
    offer_sdp: String,
    answer_sdp: String,
    stats: Arc<EngineStats>,
    events: broadcast::Sender<EngineEvent>,
    local_set: AtomicBool,
    remote: Mutex<Option<String>>,
    applied: Mutex<Vec<String>>,
    connected: AtomicBool,
    attached: AtomicUsize,
}

impl FakeEngine {
    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn attached_tracks(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    /// Meldet einen Verbindungszustand, wie ihn ICE liefern würde
    pub fn emit_state(&self, state: PeerState) {
        let _ = self.events.send(EngineEvent::StateChanged(state));
    }

    fn set_local(&self, sdp: &str) {
        self.stats
            .directory
            .lock()
            .insert(sdp.to_string(), self.participant.clone());
        self.local_set.store(true, Ordering::SeqCst);

        for i in 0..2 {
            let candidate = IceCandidate {
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                ..IceCandidate::new(format!("candidate:{}-{}", self.participant, i))
            };
            let _ = self.events.send(EngineEvent::LocalCandidate(candidate));
        }
    }

    fn set_remote(&self, sdp: &str) {
        let remote = self
            .stats
            .directory
            .lock()
            .get(sdp)
            .cloned()
            .unwrap_or_else(|| "remote".to_string());
        *self.remote.lock() = Some(remote.clone());

        for kind in [TrackKind::Audio, TrackKind::Video] {
            let _ = self.events.send(EngineEvent::RemoteTrack {
                participant: remote.clone(),
                track: RemoteTrack {
                    id: format!("{remote}-{kind}"),
                    kind,
                },
            });
        }
    }

    fn maybe_connected(&self) {
        let ready = self.local_set.load(Ordering::SeqCst)
            && self.remote.lock().is_some()
            && !self.applied.lock().is_empty();
        if ready && !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(EngineEvent::StateChanged(PeerState::Connected));
        }
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn attach_tracks(&self, tracks: &TrackSet) -> Result<(), NegotiationError> {
        self.attached.fetch_add(tracks.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, NegotiationError> {
        self.stats.offers.fetch_add(1, Ordering::SeqCst);
        self.set_local(&self.offer_sdp);
        Ok(self.offer_sdp.clone())
    }

    async fn accept_offer(&self, sdp: String) -> Result<String, NegotiationError> {
        self.set_remote(&sdp);
        self.stats.answers.fetch_add(1, Ordering::SeqCst);
        self.set_local(&self.answer_sdp);
        Ok(self.answer_sdp.clone())
    }

    async fn accept_answer(&self, sdp: String) -> Result<(), NegotiationError> {
        self.set_remote(&sdp);
        self.maybe_connected();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.remote.lock().is_none() {
            return Err(NegotiationError::Candidate(
                "remote description not set".into(),
            ));
        }
        self.applied.lock().push(candidate.candidate);
        self.maybe_connected();
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(EngineEvent::StateChanged(PeerState::Closed));
        Ok(())
    }
}

pub struct FakeEngineFactory {
    pub stats: Arc<EngineStats>,
    engines: Mutex<Vec<Arc<FakeEngine>>>,
    offer_sdp: String,
    answer_sdp: String,
    gate: Option<Arc<Semaphore>>,
}

impl FakeEngineFactory {
    pub fn new(offer_sdp: &str, answer_sdp: &str) -> Arc<Self> {
        Arc::new(Self::build(offer_sdp, answer_sdp, None))
    }

    /// `create` wartet, bis der Test Permits freigibt
    pub fn gated(offer_sdp: &str, answer_sdp: &str, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(offer_sdp, answer_sdp, Some(gate)))
    }

    fn build(offer_sdp: &str, answer_sdp: &str, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            stats: Arc::new(EngineStats::default()),
            engines: Mutex::new(Vec::new()),
            offer_sdp: offer_sdp.to_string(),
            answer_sdp: answer_sdp.to_string(),
            gate,
        }
    }

    /// Ordnet ein fremdes SDP einem Teilnehmer zu
    pub fn register_sdp(&self, sdp: &str, participant: &str) {
        self.stats
            .directory
            .lock()
            .insert(sdp.to_string(), participant.to_string());
    }

    pub fn engine(&self, participant: &str) -> Option<Arc<FakeEngine>> {
        self.engines
            .lock()
            .iter()
            .find(|e| e.participant == participant)
            .cloned()
    }

    pub fn offers(&self) -> usize {
        self.stats.offers.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> usize {
        self.stats.answers.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    async fn create(
        &self,
        participant: &str,
    ) -> Result<Arc<dyn NegotiationEngine>, NegotiationError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| NegotiationError::Closed)?;
        }
        let (events, _) = broadcast::channel(64);
        let engine = Arc::new(FakeEngine {
            participant: participant.to_string(),
            offer_sdp: self.offer_sdp.clone(),
            answer_sdp: self.answer_sdp.clone(),
            stats: Arc::clone(&self.stats),
            events,
            local_set: AtomicBool::new(false),
            remote: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            attached: AtomicUsize::new(0),
        });
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

// ============================================================================
// RELAY CLIENT
// ============================================================================

/// Relay-SDK ohne Netzwerk; protokolliert jeden Aufruf
pub struct FakeRelayClient {
    calls: Mutex<Vec<String>>,
    events: broadcast::Sender<RelayEvent>,
    fail_join: Option<RelayError>,
    gate: Option<(&'static str, Arc<Semaphore>)>,
}

impl FakeRelayClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, None))
    }

    pub fn failing_join(err: RelayError) -> Arc<Self> {
        Arc::new(Self::build(Some(err), None))
    }

    /// Der Aufruf `method` wird protokolliert und wartet dann auf den Test
    pub fn gated(method: &'static str, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(None, Some((method, gate))))
    }

    fn build(fail_join: Option<RelayError>, gate: Option<(&'static str, Arc<Semaphore>)>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            calls: Mutex::new(Vec::new()),
            events,
            fail_join,
            gate,
        }
    }

    pub fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    async fn pass_gate(&self, method: &str) -> Result<(), RelayError> {
        match &self.gate {
            Some((gated, gate)) if *gated == method => {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|_| RelayError::Service("gate closed".into()))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RelayClient for FakeRelayClient {
    async fn join(&self, app_id: &str, room: &str, token: &str, uid: &str) -> Result<(), RelayError> {
        self.record(format!("join:{app_id}:{room}:{token}:{uid}"));
        self.pass_gate("join").await?;
        match &self.fail_join {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn publish(&self, tracks: &TrackSet) -> Result<(), RelayError> {
        self.record(format!("publish:{}", tracks.len()));
        self.pass_gate("publish").await
    }

    async fn unpublish(&self) -> Result<(), RelayError> {
        self.record("unpublish".into());
        Ok(())
    }

    async fn subscribe_track(
        &self,
        participant: &str,
        kind: TrackKind,
    ) -> Result<RemoteTrack, RelayError> {
        self.record(format!("subscribe:{participant}:{kind}"));
        Ok(RemoteTrack {
            id: format!("{participant}-{kind}"),
            kind,
        })
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), RelayError> {
        self.record(format!("enable:{kind}:{enabled}"));
        Ok(())
    }

    async fn leave(&self) -> Result<(), RelayError> {
        self.record("leave".into());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// SIGNALING
// ============================================================================

/// Öffnet In-Memory-Kanäle zum Hub
pub struct HubConnector {
    pub hub: RendezvousHub,
}

impl HubConnector {
    pub fn new(hub: RendezvousHub) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

#[async_trait]
impl SignalingConnector for HubConnector {
    async fn open(&self, _server_url: &str) -> Result<SignalingChannel, SignalingError> {
        Ok(self.hub.connect(64))
    }
}

/// Hub-Connector, dessen `open` erst nach Freigabe durch den Test zurückkehrt
pub struct GatedConnector {
    pub hub: RendezvousHub,
    gate: Arc<Semaphore>,
}

impl GatedConnector {
    pub fn new(hub: RendezvousHub, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self { hub, gate })
    }
}

#[async_trait]
impl SignalingConnector for GatedConnector {
    async fn open(&self, _server_url: &str) -> Result<SignalingChannel, SignalingError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SignalingError::ConnectionFailed("gate closed".into()))?;
        Ok(self.hub.connect(64))
    }
}

/// Server-Seite eines rohen Kanals, vom Test gesteuert
pub struct RawServer {
    pub to_client: mpsc::UnboundedSender<SignalingMessage>,
    pub from_client: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl RawServer {
    pub fn send(&self, msg: SignalingMessage) {
        let _ = self.to_client.send(msg);
    }

    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Nächste Nachricht, die kein Candidate ist
    pub async fn recv_non_candidate(&mut self) -> Option<SignalingMessage> {
        loop {
            match self.recv().await? {
                SignalingMessage::Candidate { .. } => continue,
                msg => return Some(msg),
            }
        }
    }
}

/// Liefert genau einen Kanal, dessen Gegenseite der Test hält
pub struct RawConnector {
    transport: Mutex<
        Option<(
            mpsc::UnboundedSender<SignalingMessage>,
            mpsc::UnboundedReceiver<SignalingMessage>,
        )>,
    >,
}

impl RawConnector {
    pub fn new() -> (Arc<Self>, RawServer) {
        let (to_client, client_inbound) = mpsc::unbounded_channel();
        let (client_outbound, from_client) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            transport: Mutex::new(Some((client_outbound, client_inbound))),
        });
        (
            connector,
            RawServer {
                to_client,
                from_client,
            },
        )
    }
}

#[async_trait]
impl SignalingConnector for RawConnector {
    async fn open(&self, _server_url: &str) -> Result<SignalingChannel, SignalingError> {
        let (outbound, inbound) = self
            .transport
            .lock()
            .take()
            .ok_or_else(|| SignalingError::ConnectionFailed("already opened".into()))?;
        Ok(SignalingChannel::from_transport("raw://test", outbound, inbound, 64))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn peer_session(
    devices: Arc<FakeDevices>,
    signaling: Arc<dyn SignalingConnector>,
    engines: Arc<FakeEngineFactory>,
) -> CallSession {
    let config = SessionConfig::default();
    let backends = Backends::new(devices, &config)
        .with_signaling(signaling)
        .with_engines(engines);
    CallSession::new(config, backends)
}

pub fn relay_session(devices: Arc<FakeDevices>, relay: Arc<FakeRelayClient>) -> CallSession {
    let config = SessionConfig::default();
    let backends = Backends::new(devices, &config).with_relay(relay);
    CallSession::new(config, backends)
}

pub fn peer_params(room: &str, participant: &str) -> CallParameters {
    CallParameters {
        participant: Some(participant.to_string()),
        ..CallParameters::peer(room)
    }
}

/// Wartet, bis die Bedingung gilt; `false` nach Timeout
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn wait_for_state(session: &CallSession, state: ConnectionState) -> bool {
    eventually(|| session.state() == state).await
}
