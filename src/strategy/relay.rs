//! Strategie über einen gehosteten Media-Relay-Dienst
//!
//! Das Hersteller-SDK wird nur über `RelayClient` angesprochen:
//! Raum betreten, Tracks veröffentlichen, entfernte Tracks abonnieren.

use super::{RemoteEvent, RemoteEvents};
use crate::media::{RemoteTrack, TrackKind, TrackSet};
use crate::session::{CallError, RelayCredential, ReleaseFailure};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ============================================================================
// SDK BOUNDARY
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("No relay client configured")]
    Unavailable,

    #[error("Failed to join relay room: {0}")]
    Join(String),

    #[error("Failed to publish local tracks: {0}")]
    Publish(String),

    #[error("Failed to subscribe to {participant}: {reason}")]
    Subscribe { participant: String, reason: String },

    #[error("Failed to leave relay room: {0}")]
    Leave(String),

    #[error("Relay service error: {0}")]
    Service(String),
}

/// Callbacks des Relay-SDKs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    UserPublished { participant: String, kind: TrackKind },
    UserUnpublished { participant: String, kind: TrackKind },
    UserLeft { participant: String },
    /// Vom SDK gemeldeter Fehler, beendet die Session
    Error(String),
}

/// Fähigkeiten des Relay-SDKs
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn join(&self, app_id: &str, room: &str, token: &str, uid: &str) -> Result<(), RelayError>;

    async fn publish(&self, tracks: &TrackSet) -> Result<(), RelayError>;

    async fn unpublish(&self) -> Result<(), RelayError>;

    async fn subscribe_track(&self, participant: &str, kind: TrackKind)
        -> Result<RemoteTrack, RelayError>;

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), RelayError>;

    /// Verlässt den Raum und gibt die SDK-Ressourcen frei
    async fn leave(&self) -> Result<(), RelayError>;

    fn events(&self) -> broadcast::Receiver<RelayEvent>;
}

// ============================================================================
// STRATEGY
// ============================================================================

pub struct ManagedRelayStrategy {
    room: String,
    credential: RelayCredential,
    client: Arc<dyn RelayClient>,
    tracks: Mutex<Option<TrackSet>>,
    joined: AtomicBool,
    published: AtomicBool,
    released: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ManagedRelayStrategy {
    pub fn new(room: String, credential: RelayCredential, client: Arc<dyn RelayClient>) -> Self {
        Self {
            room,
            credential,
            client,
            tracks: Mutex::new(None),
            joined: AtomicBool::new(false),
            published: AtomicBool::new(false),
            released: AtomicBool::new(false),
            driver: Mutex::new(None),
        }
    }

    pub async fn connect(&self, tracks: TrackSet) -> Result<RemoteEvents, CallError> {
        let relay_events = self.client.events();
        let cred = &self.credential;

        tracing::info!("Joining relay room {} as {}", self.room, cred.uid);
        self.client
            .join(&cred.app_id, &self.room, &cred.token, &cred.uid)
            .await?;
        self.joined.store(true, Ordering::SeqCst);
        if self.released.load(Ordering::SeqCst) {
            self.abandon().await;
            return Err(CallError::Ended);
        }

        *self.tracks.lock() = Some(tracks.clone());
        self.client.publish(&tracks).await?;
        self.published.store(true, Ordering::SeqCst);
        if self.released.load(Ordering::SeqCst) {
            self.abandon().await;
            return Err(CallError::Ended);
        }
        tracing::info!("Published {} local tracks to relay room {}", tracks.len(), self.room);

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RemoteEvent::Connected);

        let client = Arc::clone(&self.client);
        let driver = tokio::spawn(drive_relay_events(client, relay_events, tx));
        *self.driver.lock() = Some(driver);
        if self.released.load(Ordering::SeqCst) {
            self.abandon().await;
            return Err(CallError::Ended);
        }

        Ok(rx)
    }

    pub async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let tracks = self.tracks.lock().clone();
        if let Some(tracks) = tracks {
            tracks.set_enabled(kind, enabled);
        }
        if self.published.load(Ordering::SeqCst) {
            if let Err(e) = self.client.set_track_enabled(kind, enabled).await {
                tracing::warn!("Relay rejected {} toggle: {}", kind, e);
            }
        }
    }

    /// Verlässt den Raum; sicher auch ohne abgeschlossenes `connect`
    ///
    /// Jeder Schritt wird per `swap` genau einmal zurückgenommen, egal ob
    /// hier oder in einem parallel laufenden `connect`.
    pub async fn disconnect(&self) -> Vec<ReleaseFailure> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }

        let mut failures = Vec::new();
        if self.published.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.client.unpublish().await {
                failures.push(ReleaseFailure::new("relay publication", e));
            }
        }
        if self.joined.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.client.leave().await {
                failures.push(ReleaseFailure::new("relay room", e));
            }
        }
        tracing::info!("Left relay room {}", self.room);
        failures
    }

    // `disconnect` lief während `connect` noch wartete
    async fn abandon(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        if self.published.swap(false, Ordering::SeqCst) {
            let _ = self.client.unpublish().await;
        }
        if self.joined.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.client.leave().await {
                tracing::warn!("Failed to leave abandoned relay room: {}", e);
            }
        }
    }
}

async fn drive_relay_events(
    client: Arc<dyn RelayClient>,
    mut events: broadcast::Receiver<RelayEvent>,
    tx: mpsc::UnboundedSender<RemoteEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} relay events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let remote = match event {
            RelayEvent::UserPublished { participant, kind } => {
                match client.subscribe_track(&participant, kind).await {
                    Ok(track) => RemoteEvent::TrackPublished { participant, track },
                    Err(e) => {
                        tracing::warn!("Could not subscribe to {} {}: {}", participant, kind, e);
                        continue;
                    }
                }
            }
            RelayEvent::UserUnpublished { participant, kind } => {
                RemoteEvent::TrackUnpublished { participant, kind }
            }
            RelayEvent::UserLeft { participant } => RemoteEvent::ParticipantLeft { participant },
            RelayEvent::Error(reason) => {
                tracing::error!("Relay service error: {}", reason);
                let _ = tx.send(RemoteEvent::Failed(RelayError::Service(reason).into()));
                break;
            }
        };

        if tx.send(remote).is_err() {
            break;
        }
    }
}

impl std::fmt::Debug for ManagedRelayStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedRelayStrategy")
            .field("room", &self.room)
            .field("credential", &self.credential)
            .field("joined", &self.joined.load(Ordering::SeqCst))
            .field("published", &self.published.load(Ordering::SeqCst))
            .finish()
    }
}
