//! Zugriff auf Kamera und Mikrofon

use super::tracks::{LocalTrack, MediaSource, TrackKind, TrackSet};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Zugriff auf ein Gerät wurde verweigert oder ist nicht möglich
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessDenied {
    #[error("Permission to use the {0} device was denied")]
    PermissionDenied(TrackKind),

    #[error("No {0} device found")]
    NoDevice(TrackKind),

    #[error("The {kind} device failed: {reason}")]
    DeviceFailure { kind: TrackKind, reason: String },
}

impl MediaAccessDenied {
    /// Meldung für die Anzeige im UI
    pub fn user_message(&self) -> String {
        match self {
            MediaAccessDenied::PermissionDenied(kind) => {
                format!("Access to your {} was blocked", device_name(*kind))
            }
            MediaAccessDenied::NoDevice(kind) => {
                format!("No {} was found", device_name(*kind))
            }
            MediaAccessDenied::DeviceFailure { kind, .. } => {
                format!("Your {} could not be started", device_name(*kind))
            }
        }
    }
}

fn device_name(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "microphone",
        TrackKind::Video => "camera",
    }
}

/// Fehler beim Freigeben eines Geräts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Failed to stop {kind} source: {reason}")]
    StopFailed { kind: TrackKind, reason: String },
}

// ============================================================================
// DEVICES
// ============================================================================

/// Plattform-Zugriff auf Aufnahmegeräte
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open(&self, kind: TrackKind) -> Result<Arc<dyn MediaSource>, MediaAccessDenied>;
}

// ============================================================================
// ACQUISITION
// ============================================================================

/// Fordert Mikrofon und Kamera an
pub struct MediaAcquisition {
    devices: Arc<dyn MediaDevices>,
}

impl MediaAcquisition {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// Öffnet Audio und Video
    ///
    /// Scheitert das zweite Gerät, wird das bereits geöffnete wieder
    /// freigegeben, bevor der Fehler zurückgegeben wird.
    pub async fn acquire(&self) -> Result<TrackSet, MediaAccessDenied> {
        let mut tracks = Vec::with_capacity(2);

        for kind in [TrackKind::Audio, TrackKind::Video] {
            match self.devices.open(kind).await {
                Ok(source) => {
                    tracing::info!("Acquired {} device: {}", kind, source.label());
                    tracks.push(LocalTrack::new(source));
                }
                Err(denied) => {
                    tracing::error!("Media acquisition failed: {}", denied);
                    for (kind, e) in TrackSet::new(tracks).release_all() {
                        tracing::warn!("Failed to release {} after denial: {}", kind, e);
                    }
                    return Err(denied);
                }
            }
        }

        Ok(TrackSet::new(tracks))
    }
}
