//! Direkte Peer-Connection über den Rendezvous-Server
//!
//! Ein Driver-Task pro Session verarbeitet Signaling-Nachrichten und
//! Engine-Events nacheinander, damit der Negotiator nie parallel läuft.

use super::{RemoteEvent, RemoteEvents};
use crate::media::{TrackKind, TrackSet};
use crate::negotiation::{
    EngineEvent, EngineFactory, NegotiationEngine, Negotiator, PeerState, Step,
};
use crate::session::{CallError, ReleaseFailure};
use crate::signaling::{
    SignalingChannel, SignalingConnector, SignalingError, SignalingEvent, SignalingMessage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub struct PeerSignalingStrategy {
    room: String,
    participant: String,
    server_url: String,
    connector: Arc<dyn SignalingConnector>,
    engines: Arc<dyn EngineFactory>,
    channel: Mutex<Option<Arc<SignalingChannel>>>,
    engine: Mutex<Option<Arc<dyn NegotiationEngine>>>,
    tracks: Mutex<Option<TrackSet>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl PeerSignalingStrategy {
    pub fn new(
        room: String,
        participant: String,
        server_url: String,
        connector: Arc<dyn SignalingConnector>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            room,
            participant,
            server_url,
            connector,
            engines,
            channel: Mutex::new(None),
            engine: Mutex::new(None),
            tracks: Mutex::new(None),
            driver: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub async fn connect(&self, tracks: TrackSet) -> Result<RemoteEvents, CallError> {
        *self.tracks.lock() = Some(tracks.clone());

        let channel = Arc::new(self.connector.open(&self.server_url).await?);
        *self.channel.lock() = Some(Arc::clone(&channel));
        if self.released.load(Ordering::SeqCst) {
            self.abandon().await;
            return Err(CallError::Ended);
        }

        let engine = self
            .engines
            .create(&self.participant)
            .await
            .map_err(CallError::PeerConnection)?;
        *self.engine.lock() = Some(Arc::clone(&engine));
        if self.released.load(Ordering::SeqCst) {
            self.abandon().await;
            return Err(CallError::Ended);
        }

        engine
            .attach_tracks(&tracks)
            .await
            .map_err(CallError::PeerConnection)?;

        // Beide Quellen abonnieren, bevor der Server antworten kann
        let signaling_rx = channel.subscribe();
        let engine_rx = engine.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = PeerDriver {
            negotiator: Negotiator::new(self.room.clone(), Arc::clone(&engine)),
            channel: Arc::clone(&channel),
            room: self.room.clone(),
            events: tx,
            connected: false,
        };
        *self.driver.lock() = Some(tokio::spawn(driver.run(signaling_rx, engine_rx)));
        if self.released.load(Ordering::SeqCst) {
            self.abandon().await;
            return Err(CallError::Ended);
        }

        tracing::info!("Joining room {} as {}", self.room, self.participant);
        channel
            .send(SignalingMessage::join(
                self.room.clone(),
                Some(self.participant.clone()),
            ))
            .await?;

        Ok(rx)
    }

    pub async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let tracks = self.tracks.lock().clone();
        if let Some(tracks) = tracks {
            if tracks.set_enabled(kind, enabled).is_none() {
                tracing::debug!("No local {} track to toggle", kind);
            }
        }
    }

    /// Sendet `leave`, schließt Peer-Connection und Kanal (idempotent)
    pub async fn disconnect(&self) -> Vec<ReleaseFailure> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        let channel = self.channel.lock().take();
        let engine = self.engine.lock().take();

        let mut failures = Vec::new();
        if let Some(channel) = &channel {
            if let Err(e) = channel.send(SignalingMessage::leave(self.room.clone())).await {
                failures.push(ReleaseFailure::new("leave message", e));
            }
        }
        if let Some(engine) = engine {
            if let Err(e) = engine.close().await {
                failures.push(ReleaseFailure::new("peer connection", e));
            }
        }
        if let Some(channel) = channel {
            channel.close().await;
        }

        tracing::info!("Left room {}", self.room);
        failures
    }

    // Aufräumen, falls `disconnect` während eines Schritts von `connect` lief
    async fn abandon(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            let _ = engine.close().await;
        }
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }
}

impl std::fmt::Debug for PeerSignalingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSignalingStrategy")
            .field("room", &self.room)
            .field("participant", &self.participant)
            .field("server_url", &self.server_url)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// DRIVER
// ============================================================================

struct PeerDriver {
    negotiator: Negotiator,
    channel: Arc<SignalingChannel>,
    room: String,
    events: mpsc::UnboundedSender<RemoteEvent>,
    connected: bool,
}

impl PeerDriver {
    async fn run(
        mut self,
        mut signaling: broadcast::Receiver<SignalingEvent>,
        mut engine: broadcast::Receiver<EngineEvent>,
    ) {
        let mut signaling_open = true;

        loop {
            tokio::select! {
                event = signaling.recv(), if signaling_open => match event {
                    Ok(SignalingEvent::Message(msg)) => {
                        if !self.on_message(msg).await {
                            break;
                        }
                    }
                    Ok(SignalingEvent::Disconnected) | Err(broadcast::error::RecvError::Closed) => {
                        signaling_open = false;
                        if !self.on_signaling_lost() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Missed {} signaling messages", n);
                    }
                },

                event = engine.recv() => match event {
                    Ok(event) => {
                        if !self.on_engine_event(event).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Missed {} peer connection events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!("Negotiation driver for room {} stopped", self.room);
    }

    /// `false` beendet den Driver
    async fn on_message(&mut self, msg: SignalingMessage) -> bool {
        let tag = msg.tag();
        match self.negotiator.handle(msg).await {
            Ok(Step::Nothing) => true,
            Ok(Step::Reply(reply)) => {
                if let Err(e) = self.channel.send(reply).await {
                    tracing::error!("Failed to send reply: {}", e);
                    return self.emit(RemoteEvent::Failed(e.into()));
                }
                true
            }
            Ok(Step::PeerLeft) => self.emit(RemoteEvent::PeerLeft),
            Ok(Step::RoomFull) => {
                tracing::error!("Room {} is full", self.room);
                let err = SignalingError::RoomFull(self.room.clone());
                self.emit(RemoteEvent::Failed(err.into()));
                false
            }
            Err(e) => {
                tracing::warn!("Ignoring {:?} message: {}", tag, e);
                true
            }
        }
    }

    fn on_signaling_lost(&mut self) -> bool {
        if self.connected {
            tracing::warn!("Signaling channel dropped, media keeps flowing");
            return true;
        }
        tracing::error!("Signaling channel dropped before the call connected");
        self.emit(RemoteEvent::Failed(SignalingError::Dropped.into()));
        false
    }

    async fn on_engine_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                let msg = SignalingMessage::candidate(self.room.clone(), candidate);
                if let Err(e) = self.channel.send(msg).await {
                    tracing::debug!("Could not send local candidate: {}", e);
                }
                true
            }
            EngineEvent::RemoteTrack { participant, track } => {
                self.emit(RemoteEvent::TrackPublished { participant, track })
            }
            EngineEvent::StateChanged(PeerState::Connected) => {
                self.connected = true;
                self.emit(RemoteEvent::Connected)
            }
            EngineEvent::StateChanged(PeerState::Disconnected) => {
                self.emit(RemoteEvent::Disconnected)
            }
            EngineEvent::StateChanged(PeerState::Failed) => {
                self.connected = false;
                self.emit(RemoteEvent::PeerLeft)
            }
            EngineEvent::StateChanged(PeerState::Closed) => false,
            EngineEvent::StateChanged(state) => {
                tracing::debug!("Peer connection state: {:?}", state);
                true
            }
        }
    }

    fn emit(&self, event: RemoteEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
