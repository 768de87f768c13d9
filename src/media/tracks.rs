//! Lokale und entfernte Media-Tracks

use super::acquisition::MediaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// TRACK KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

/// Hardware-Quelle hinter einem lokalen Track (Mikrofon, Kamera)
pub trait MediaSource: Send + Sync {
    fn kind(&self) -> TrackKind;

    fn label(&self) -> String;

    /// Pausiert bzw. setzt die Aufnahme fort, ohne das Gerät freizugeben
    fn set_enabled(&self, enabled: bool);

    /// Gibt das Gerät frei
    fn stop(&self) -> Result<(), MediaError>;
}

// ============================================================================
// LOCAL TRACK
// ============================================================================

/// Lokaler Track mit Enabled-Flag
///
/// Clones teilen sich Flag und Freigabe-Status. `release()` ruft
/// `MediaSource::stop` höchstens einmal auf, egal wie viele Besitzer
/// ihn aufrufen.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    source: Arc<dyn MediaSource>,
    enabled: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            enabled: Arc::new(AtomicBool::new(true)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    pub fn label(&self) -> String {
        self.source.label()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !self.is_released() {
            self.source.set_enabled(enabled);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stoppt die Quelle (idempotent)
    pub fn release(&self) -> Result<(), MediaError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Releasing {} track {}", self.kind(), self.id);
        self.source.stop()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("enabled", &self.is_enabled())
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// TRACK SET
// ============================================================================

/// Geordnete Menge lokaler Tracks (Audio vor Video)
#[derive(Debug, Clone, Default)]
pub struct TrackSet {
    tracks: Vec<LocalTrack>,
}

impl TrackSet {
    pub fn new(mut tracks: Vec<LocalTrack>) -> Self {
        tracks.sort_by_key(|t| t.kind());
        Self { tracks }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter()
    }

    pub fn get(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Setzt das Enabled-Flag des Tracks dieser Art; `None` falls keiner existiert
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> Option<bool> {
        let track = self.get(kind)?;
        track.set_enabled(enabled);
        Some(enabled)
    }

    /// Gibt alle Tracks frei und sammelt Fehler, statt abzubrechen
    pub fn release_all(&self) -> Vec<(TrackKind, MediaError)> {
        self.tracks
            .iter()
            .filter_map(|t| t.release().err().map(|e| (t.kind(), e)))
            .collect()
    }
}

// ============================================================================
// REMOTE TRACKS
// ============================================================================

/// Ein Track eines entfernten Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Entfernter Teilnehmer mit seinen veröffentlichten Tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteParticipant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    /// Ersetzt einen vorhandenen Track derselben Art
    pub fn attach(&mut self, track: RemoteTrack) {
        self.tracks.retain(|t| t.kind != track.kind);
        self.tracks.push(track);
        self.tracks.sort_by_key(|t| t.kind);
    }

    pub fn detach(&mut self, kind: TrackKind) {
        self.tracks.retain(|t| t.kind != kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        kind: TrackKind,
        stops: AtomicUsize,
        enabled: AtomicBool,
    }

    impl CountingSource {
        fn new(kind: TrackKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                stops: AtomicUsize::new(0),
                enabled: AtomicBool::new(true),
            })
        }
    }

    impl MediaSource for CountingSource {
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

    #[test]
    fn release_stops_source_once_across_clones() {
        let source = CountingSource::new(TrackKind::Audio);
        let track = LocalTrack::new(source.clone());
        let clone = track.clone();

        track.release().unwrap();
        clone.release().unwrap();
        track.release().unwrap();

        assert_eq!(source.stops.load(Ordering::SeqCst), 1);
        assert!(clone.is_released());
    }

    #[test]
    fn track_set_orders_audio_first() {
        let video = LocalTrack::new(CountingSource::new(TrackKind::Video));
        let audio = LocalTrack::new(CountingSource::new(TrackKind::Audio));
        let set = TrackSet::new(vec![video, audio]);

        let kinds: Vec<_> = set.iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![TrackKind::Audio, TrackKind::Video]);
    }

    #[test]
    fn set_enabled_reaches_the_source() {
        let source = CountingSource::new(TrackKind::Video);
        let set = TrackSet::new(vec![LocalTrack::new(source.clone())]);

        assert_eq!(set.set_enabled(TrackKind::Video, false), Some(false));
        assert!(!source.enabled.load(Ordering::SeqCst));
        assert_eq!(set.set_enabled(TrackKind::Audio, false), None);
    }

    #[test]
    fn participant_attach_replaces_same_kind() {
        let mut participant = RemoteParticipant::new("p1");
        participant.attach(RemoteTrack {
            id: "v1".into(),
            kind: TrackKind::Video,
        });
        participant.attach(RemoteTrack {
            id: "v2".into(),
            kind: TrackKind::Video,
        });
        assert_eq!(participant.tracks.len(), 1);
        assert_eq!(participant.tracks[0].id, "v2");

        participant.detach(TrackKind::Video);
        assert!(participant.tracks.is_empty());
    }
}
