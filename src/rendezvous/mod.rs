//! Rendezvous Module - Server-Seite des Signaling-Protokolls
//!
//! Raumverwaltung und Weiterleitung von Offer/Answer/Candidate/Leave
//! zwischen genau zwei Teilnehmern pro Raum.

mod hub;
mod server;

pub use hub::{ClientId, RendezvousHub, ROOM_CAPACITY};
pub use server::serve;
