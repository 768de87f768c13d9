//! Media Module - Lokale Tracks und Gerätezugriff
//!
//! Dieses Modul verwaltet:
//! - Anfordern von Mikrofon und Kamera
//! - Enabled-Flags der lokalen Tracks
//! - Einmalige Freigabe der Geräte

mod acquisition;
#[cfg(feature = "device-capture")]
mod microphone;
mod tracks;

pub use acquisition::{MediaAccessDenied, MediaAcquisition, MediaDevices, MediaError};
#[cfg(feature = "device-capture")]
pub use microphone::{CpalDevices, Microphone, SAMPLE_RATE};
pub use tracks::{LocalTrack, MediaSource, RemoteParticipant, RemoteTrack, TrackKind, TrackSet};
