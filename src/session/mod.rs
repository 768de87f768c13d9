//! Session Module - Lebenszyklus eines Calls
//!
//! Dieses Modul verwaltet:
//! - Prüfung der Aufrufparameter und Wahl des Transportwegs
//! - Den Verbindungsstatus für das UI
//! - Die Freigabe aller belegten Ressourcen

mod call;
mod params;
mod release;

pub use call::{
    Backends, CallError, CallSession, ConnectionState, SessionEvent, SessionSnapshot,
};
pub use params::{CallParameters, CallRoute, RelayCredential, ValidatedCall};
pub use release::{ReleaseFailure, ReleaseList};
