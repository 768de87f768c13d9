//! Signaling Module - Kanal zum Rendezvous-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Rendezvous-Server:
//! - WebSocket-Verbindung aufbauen und schließen
//! - Nachrichten serialisieren und senden
//! - Eingehende Nachrichten parsen und weiterleiten
//!

mod channel;
mod messages;

pub use channel::{
    SignalingChannel, SignalingConnector, SignalingError, SignalingEvent, WebSocketConnector,
};
pub use messages::*;
