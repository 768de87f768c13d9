//! Schnittstelle zur Peer-Connection der Plattform

use crate::media::{RemoteTrack, TrackSet};
use crate::signaling::{IceCandidate, MessageTag};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Message for room {received} does not belong to room {expected}")]
    RoomMismatch { expected: String, received: String },

    #[error("Unexpected {tag:?} message: {reason}")]
    Unexpected { tag: MessageTag, reason: &'static str },

    #[error("Duplicate {0:?} message")]
    Duplicate(MessageTag),

    #[error("Failed to apply ICE candidate: {0}")]
    Candidate(String),

    #[error("Peer connection closed")]
    Closed,
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Verbindungsstatus der Peer-Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events, die eine NegotiationEngine auslöst
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Neuer lokaler ICE Candidate, muss an den Peer gesendet werden
    LocalCandidate(IceCandidate),

    /// Entfernter Track angekommen; `participant` ist die Stream-ID des Peers
    RemoteTrack {
        participant: String,
        track: RemoteTrack,
    },

    StateChanged(PeerState),
}

// ============================================================================
// ENGINE
// ============================================================================

/// Offer/Answer- und ICE-Primitive einer Peer-Connection
///
/// `create_offer` und `accept_offer` setzen die lokale Description selbst.
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Fügt die lokalen Tracks hinzu (vor dem ersten Offer/Answer)
    async fn attach_tracks(&self, tracks: &TrackSet) -> Result<(), NegotiationError>;

    /// Erstellt ein Offer, setzt es lokal und gibt das SDP zurück
    async fn create_offer(&self) -> Result<String, NegotiationError>;

    /// Setzt das Offer als Remote Description und gibt das Answer-SDP zurück
    async fn accept_offer(&self, sdp: String) -> Result<String, NegotiationError>;

    async fn accept_answer(&self, sdp: String) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    async fn has_remote_description(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Erzeugt eine Engine pro Session
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// `participant` wird als Stream-ID der lokalen Tracks verwendet
    async fn create(&self, participant: &str)
        -> Result<Arc<dyn NegotiationEngine>, NegotiationError>;
}
