//! Peer Call - Zwei-Parteien Audio/Video-Calls
//!
//! Baut eine Call-Session zwischen zwei Clients auf und wieder ab:
//! - Gehosteter Relay-Dienst, wenn App-ID und Token vorliegen
//! - Sonst direkte WebRTC-Verbindung über einen Rendezvous-Server
//! - Deterministische Freigabe von Geräten, Verbindungen und Kanälen
//!
//! Der Rendezvous-Server selbst liegt in [`rendezvous`] und läuft als
//! Binary `peer-call-rendezvous`.

pub mod config;
pub mod media;
pub mod negotiation;
pub mod rendezvous;
pub mod session;
pub mod signaling;
pub mod strategy;

pub use config::{RendezvousConfig, SessionConfig};
pub use session::{
    Backends, CallError, CallParameters, CallSession, ConnectionState, SessionEvent,
    SessionSnapshot,
};

/// Standard-Filter, falls `RUST_LOG` nicht gesetzt ist
pub const DEFAULT_LOG_FILTER: &str = "peer_call=debug,webrtc=warn";

/// Initialisiert Logging; weitere Aufrufe sind wirkungslos
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
