//! Call-Session: Zustandsmaschine, Strategiewahl und Aufräumen
//!
//! Ablauf von `start`:
//! 1. Parameter prüfen und Strategie wählen
//! 2. Kamera und Mikrofon anfordern
//! 3. Strategie verbinden
//! 4. Remote-Events in den Session-Zustand übernehmen
//!
//! Jede belegte Ressource landet sofort in der Freigabeliste. `end()` und
//! Fehler arbeiten diese Liste genau einmal ab. Ergebnisse, die nach `end()`
//! eintreffen, werden verworfen.

use super::params::CallParameters;
use super::release::{ReleaseFailure, ReleaseList};
use crate::config::SessionConfig;
use crate::media::{
    MediaAccessDenied, MediaAcquisition, MediaDevices, RemoteParticipant, TrackKind, TrackSet,
};
use crate::negotiation::{EngineFactory, NegotiationError, RtcEngineFactory};
use crate::signaling::{SignalingConnector, SignalingError, WebSocketConnector};
use crate::strategy::{CallStrategy, RelayClient, RelayError, RemoteEvent, RemoteEvents};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid call parameters: {0}")]
    InvalidParameters(String),

    #[error("Media access denied: {0}")]
    MediaAccessDenied(#[from] MediaAccessDenied),

    #[error("Signaling transport error: {0}")]
    SignalingTransport(#[from] SignalingError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Peer-Connection konnte nicht aufgebaut werden
    #[error("Peer connection error: {0}")]
    PeerConnection(NegotiationError),

    #[error("Relay service error: {0}")]
    RelayService(#[from] RelayError),

    #[error("Call already started")]
    AlreadyStarted,

    #[error("Call has ended")]
    Ended,
}

impl CallError {
    /// Meldung für die Anzeige im UI
    pub fn user_message(&self) -> String {
        match self {
            CallError::MediaAccessDenied(denied) => denied.user_message(),
            CallError::SignalingTransport(SignalingError::RoomFull(_)) => {
                "This call already has two participants".to_string()
            }
            CallError::SignalingTransport(_) => "Could not reach the call server".to_string(),
            CallError::RelayService(_) => "The call service reported an error".to_string(),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Idle,
    AcquiringMedia,
    Connecting,
    Connected,
    Ended,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Ended | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::AcquiringMedia => "acquiring-media",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Ended => "ended",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events für das UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    ParticipantsChanged(Vec<RemoteParticipant>),
    /// Nutzerlesbare Fehlermeldung
    Error(String),
}

/// Serialisierbare Sicht auf die Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub participants: Vec<RemoteParticipant>,
    pub strategy: Option<&'static str>,
    pub error: Option<String>,
}

// ============================================================================
// BACKENDS
// ============================================================================

/// Plattform-Anbindungen einer Session
#[derive(Clone)]
pub struct Backends {
    pub devices: Arc<dyn MediaDevices>,
    pub signaling: Arc<dyn SignalingConnector>,
    pub engines: Arc<dyn EngineFactory>,
    /// Ohne Relay-Client schlägt der Relay-Pfad mit `RelayError::Unavailable` fehl
    pub relay: Option<Arc<dyn RelayClient>>,
}

impl Backends {
    /// WebSocket-Signaling und WebRTC aus der Konfiguration
    pub fn new(devices: Arc<dyn MediaDevices>, config: &SessionConfig) -> Self {
        Self {
            devices,
            signaling: Arc::new(WebSocketConnector::new(
                config.event_capacity,
                config.connect_timeout,
            )),
            engines: Arc::new(RtcEngineFactory::new(
                config.ice_servers.clone(),
                config.event_capacity,
            )),
            relay: None,
        }
    }

    /// Mikrofon über cpal, keine Kamera
    #[cfg(feature = "device-capture")]
    pub fn with_capture_devices(config: &SessionConfig) -> Self {
        Self::new(Arc::new(crate::media::CpalDevices), config)
    }

    pub fn with_signaling(mut self, signaling: Arc<dyn SignalingConnector>) -> Self {
        self.signaling = signaling;
        self
    }

    pub fn with_engines(mut self, engines: Arc<dyn EngineFactory>) -> Self {
        self.engines = engines;
        self
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayClient>) -> Self {
        self.relay = Some(relay);
        self
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("relay", &self.relay.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

struct SessionInner {
    state: ConnectionState,
    started: bool,
    video_enabled: bool,
    audio_enabled: bool,
    strategy: Option<Arc<CallStrategy>>,
    tracks: Option<TrackSet>,
    participants: BTreeMap<String, RemoteParticipant>,
    releases: ReleaseList,
    last_error: Option<CallError>,
}

struct Shared {
    config: SessionConfig,
    backends: Backends,
    inner: Mutex<SessionInner>,
    event_tx: broadcast::Sender<SessionEvent>,
    // Serialisiert Toggles gegeneinander
    toggle_lock: tokio::sync::Mutex<()>,
}

/// Eine Call-Session; Klone teilen denselben Zustand
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    pub fn new(config: SessionConfig, backends: Backends) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            shared: Arc::new(Shared {
                config,
                backends,
                inner: Mutex::new(SessionInner {
                    state: ConnectionState::Idle,
                    started: false,
                    video_enabled: true,
                    audio_enabled: true,
                    strategy: None,
                    tracks: None,
                    participants: BTreeMap::new(),
                    releases: ReleaseList::new(),
                    last_error: None,
                }),
                event_tx,
                toggle_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock();
        SessionSnapshot {
            state: inner.state,
            video_enabled: inner.video_enabled,
            audio_enabled: inner.audio_enabled,
            participants: inner.participants.values().cloned().collect(),
            strategy: inner.strategy.as_ref().map(|s| s.name()),
            error: inner.last_error.as_ref().map(CallError::user_message),
        }
    }

    /// Startet den Call; nur einmal pro Session möglich
    pub async fn start(&self, params: CallParameters) -> Result<(), CallError> {
        self.ensure_startable()?;

        let call = params.validate()?;
        let strategy = match CallStrategy::select(&call, &self.shared.backends, &self.shared.config)
        {
            Ok(strategy) => Arc::new(strategy),
            Err(err) => {
                // Gewählte Route ohne Backend: Fehler des Dienstes, noch ohne Medien
                {
                    let mut inner = self.shared.inner.lock();
                    if inner.state.is_terminal() {
                        return Err(CallError::Ended);
                    }
                    if inner.started {
                        return Err(CallError::AlreadyStarted);
                    }
                    inner.started = true;
                }
                return Err(self.fail_or_ended(err).await);
            }
        };

        {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_terminal() {
                return Err(CallError::Ended);
            }
            if inner.started {
                return Err(CallError::AlreadyStarted);
            }
            inner.started = true;
            inner.strategy = Some(Arc::clone(&strategy));
            inner.state = ConnectionState::AcquiringMedia;
        }
        tracing::info!(
            "Starting {} call in room {} as {}",
            strategy.name(),
            call.room,
            call.participant
        );
        self.shared.emit(SessionEvent::StateChanged(ConnectionState::AcquiringMedia));

        let acquisition = MediaAcquisition::new(Arc::clone(&self.shared.backends.devices));
        let tracks = match acquisition.acquire().await {
            Ok(tracks) => tracks,
            Err(denied) => {
                let err = CallError::from(denied);
                return Err(self.fail_or_ended(err).await);
            }
        };

        if !self.adopt_tracks(&tracks, &strategy) {
            tracing::debug!("Session ended during media acquisition, releasing tracks");
            tracks.release_all();
            return Err(CallError::Ended);
        }
        self.shared.emit(SessionEvent::StateChanged(ConnectionState::Connecting));

        let events = match strategy.connect(tracks).await {
            Ok(events) => events,
            Err(CallError::Ended) => return Err(CallError::Ended),
            Err(err) => return Err(self.fail_or_ended(err).await),
        };

        let mut inner = self.shared.inner.lock();
        if inner.state.is_terminal() {
            return Err(CallError::Ended);
        }
        let pump = tokio::spawn(pump_remote_events(Arc::downgrade(&self.shared), events));
        inner.releases.push("event pump", move || async move {
            pump.abort();
            Ok::<_, Infallible>(())
        });

        Ok(())
    }

    pub async fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video).await
    }

    pub async fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio).await
    }

    /// Beendet den Call und gibt alle Ressourcen frei (idempotent)
    pub async fn end(&self) -> Vec<ReleaseFailure> {
        let (releases, changed) = {
            let mut inner = self.shared.inner.lock();
            let changed = !inner.state.is_terminal();
            if changed {
                inner.state = ConnectionState::Ended;
                inner.participants.clear();
                inner.tracks = None;
            }
            (inner.releases.take(), changed)
        };

        if changed {
            tracing::info!("Call ended");
            self.shared.emit(SessionEvent::StateChanged(ConnectionState::Ended));
        }
        releases.release_all().await
    }

    fn ensure_startable(&self) -> Result<(), CallError> {
        let inner = self.shared.inner.lock();
        if inner.state.is_terminal() {
            Err(CallError::Ended)
        } else if inner.started {
            Err(CallError::AlreadyStarted)
        } else {
            Ok(())
        }
    }

    /// Übernimmt die Tracks in die Session; `false` wenn sie inzwischen beendet wurde
    fn adopt_tracks(&self, tracks: &TrackSet, strategy: &Arc<CallStrategy>) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }

        tracks.set_enabled(TrackKind::Video, inner.video_enabled);
        tracks.set_enabled(TrackKind::Audio, inner.audio_enabled);

        for track in tracks.iter() {
            let track = track.clone();
            inner
                .releases
                .push(format!("{} track", track.kind()), move || async move {
                    track.release()
                });
        }

        let strategy = Arc::clone(strategy);
        inner
            .releases
            .push_group(strategy.name(), move || async move { strategy.disconnect().await });

        inner.tracks = Some(tracks.clone());
        inner.state = ConnectionState::Connecting;
        true
    }

    async fn toggle(&self, kind: TrackKind) -> bool {
        let _guard = self.shared.toggle_lock.lock().await;

        let (enabled, strategy) = {
            let mut inner = self.shared.inner.lock();
            let flag = match kind {
                TrackKind::Video => &mut inner.video_enabled,
                TrackKind::Audio => &mut inner.audio_enabled,
            };
            *flag = !*flag;
            let enabled = *flag;

            if let Some(tracks) = &inner.tracks {
                tracks.set_enabled(kind, enabled);
            }
            let strategy = if inner.state.is_terminal() {
                None
            } else {
                inner.strategy.clone()
            };
            (enabled, strategy)
        };

        if let Some(strategy) = strategy {
            strategy.set_track_enabled(kind, enabled).await;
        }
        tracing::debug!("{} enabled: {}", kind, enabled);
        enabled
    }

    // Liefert den Fehler, den `start` zurückgeben soll
    async fn fail_or_ended(&self, err: CallError) -> CallError {
        if self.fail(err.clone()).await {
            err
        } else {
            CallError::Ended
        }
    }

    /// Wechselt nach `failed` und räumt sofort auf; `false` wenn schon terminal
    async fn fail(&self, err: CallError) -> bool {
        let releases = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = ConnectionState::Failed;
            inner.participants.clear();
            inner.tracks = None;
            inner.last_error = Some(err.clone());
            inner.releases.take()
        };

        tracing::error!("Call failed: {}", err);
        self.shared.emit(SessionEvent::StateChanged(ConnectionState::Failed));
        self.shared.emit(SessionEvent::Error(err.user_message()));

        releases.release_all().await;
        true
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Übernimmt ein Remote-Event; nach `end()` wirkungslos
    fn apply_remote(&self, event: RemoteEvent) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }

            let mut participants_changed = false;
            match event {
                RemoteEvent::Connected => {
                    if inner.state == ConnectionState::Connecting {
                        tracing::info!("Call connected");
                        inner.state = ConnectionState::Connected;
                        events.push(SessionEvent::StateChanged(ConnectionState::Connected));
                    }
                }
                RemoteEvent::TrackPublished { participant, track } => {
                    tracing::info!("{} published {} track", participant, track.kind);
                    inner
                        .participants
                        .entry(participant.clone())
                        .or_insert_with(|| RemoteParticipant::new(participant))
                        .attach(track);
                    participants_changed = true;
                }
                RemoteEvent::TrackUnpublished { participant, kind } => {
                    if let Some(p) = inner.participants.get_mut(&participant) {
                        p.detach(kind);
                        if p.tracks.is_empty() {
                            inner.participants.remove(&participant);
                        }
                        participants_changed = true;
                    }
                }
                RemoteEvent::ParticipantLeft { participant } => {
                    tracing::info!("{} left the call", participant);
                    participants_changed = inner.participants.remove(&participant).is_some();
                }
                RemoteEvent::Disconnected => {
                    if inner.state == ConnectionState::Connected {
                        tracing::info!("Peer connection interrupted");
                        inner.state = ConnectionState::Connecting;
                        events.push(SessionEvent::StateChanged(ConnectionState::Connecting));
                    }
                }
                RemoteEvent::PeerLeft => {
                    participants_changed = !inner.participants.is_empty();
                    inner.participants.clear();
                    if inner.state == ConnectionState::Connected {
                        tracing::info!("Remote peer left, call stays open until ended");
                        inner.state = ConnectionState::Connecting;
                        events.push(SessionEvent::StateChanged(ConnectionState::Connecting));
                    }
                }
                RemoteEvent::Failed(_) => {}
            }

            if participants_changed {
                events.push(SessionEvent::ParticipantsChanged(
                    inner.participants.values().cloned().collect(),
                ));
            }
        }

        for event in events {
            self.emit(event);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let releases = self.inner.get_mut().releases.take();
        if releases.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Session dropped without end(), releasing resources");
                handle.spawn(async move {
                    releases.release_all().await;
                });
            }
            Err(_) => {
                tracing::warn!("Session dropped outside a runtime, {} resources leaked", releases.len());
            }
        }
    }
}

async fn pump_remote_events(shared: Weak<Shared>, mut events: RemoteEvents) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };

        if let RemoteEvent::Failed(err) = event {
            // Eigener Task: `fail` bricht beim Aufräumen diesen Pump ab
            let session = CallSession { shared };
            tokio::spawn(async move {
                session.fail(err).await;
            });
            break;
        }

        shared.apply_remote(event);
    }
}
