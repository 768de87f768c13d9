//! Strategy Module - Transportwege einer Call-Session
//!
//! Zwei austauschbare Wege mit gleicher Oberfläche
//! (`connect`, `set_track_enabled`, `disconnect`):
//! - `ManagedRelayStrategy`: gehosteter Relay-Dienst über ein Hersteller-SDK
//! - `PeerSignalingStrategy`: direkte Peer-Connection über den Rendezvous-Server
//!
//! Die Auswahl geschieht einmal anhand von `CallRoute`.

mod peer;
mod relay;

pub use peer::PeerSignalingStrategy;
pub use relay::{ManagedRelayStrategy, RelayClient, RelayError, RelayEvent};

use crate::config::SessionConfig;
use crate::media::{RemoteTrack, TrackKind, TrackSet};
use crate::session::{Backends, CallError, CallRoute, ReleaseFailure, ValidatedCall};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events der aktiven Strategie an die Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Medien fließen
    Connected,
    TrackPublished { participant: String, track: RemoteTrack },
    TrackUnpublished { participant: String, kind: TrackKind },
    ParticipantLeft { participant: String },
    /// Verbindung unterbrochen, die Teilnehmer bleiben erhalten
    Disconnected,
    /// Gegenstelle hat den Raum verlassen, die Session bleibt bestehen
    PeerLeft,
    Failed(CallError),
}

pub type RemoteEvents = mpsc::UnboundedReceiver<RemoteEvent>;

#[derive(Debug)]
pub enum CallStrategy {
    ManagedRelay(ManagedRelayStrategy),
    PeerSignaling(PeerSignalingStrategy),
}

impl CallStrategy {
    /// Baut die Strategie für die geprüfte Route; belegt noch nichts
    pub fn select(
        call: &ValidatedCall,
        backends: &Backends,
        config: &SessionConfig,
    ) -> Result<Self, CallError> {
        match &call.route {
            CallRoute::ManagedRelay(credential) => {
                let client = backends.relay.clone().ok_or(RelayError::Unavailable)?;
                Ok(Self::ManagedRelay(ManagedRelayStrategy::new(
                    call.room.clone(),
                    credential.clone(),
                    client,
                )))
            }
            CallRoute::PeerSignaling => Ok(Self::PeerSignaling(PeerSignalingStrategy::new(
                call.room.clone(),
                call.participant.clone(),
                config.signaling_url.clone(),
                Arc::clone(&backends.signaling),
                Arc::clone(&backends.engines),
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ManagedRelay(_) => "managed-relay",
            Self::PeerSignaling(_) => "peer-signaling",
        }
    }

    pub async fn connect(&self, tracks: TrackSet) -> Result<RemoteEvents, CallError> {
        match self {
            Self::ManagedRelay(s) => s.connect(tracks).await,
            Self::PeerSignaling(s) => s.connect(tracks).await,
        }
    }

    pub async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        match self {
            Self::ManagedRelay(s) => s.set_track_enabled(kind, enabled).await,
            Self::PeerSignaling(s) => s.set_track_enabled(kind, enabled).await,
        }
    }

    /// Idempotent; sicher auch vor oder während `connect`
    pub async fn disconnect(&self) -> Vec<ReleaseFailure> {
        match self {
            Self::ManagedRelay(s) => s.disconnect().await,
            Self::PeerSignaling(s) => s.disconnect().await,
        }
    }
}
