//! Negotiation Module - Offer/Answer/ICE
//!
//! Dieses Modul verwaltet:
//! - WebRTC Peer Connections
//! - Das Offer/Answer-Protokoll zwischen zwei Teilnehmern
//! - Puffern früher ICE Candidates

mod engine;
mod negotiator;
mod rtc;

pub use engine::{EngineEvent, EngineFactory, NegotiationEngine, NegotiationError, PeerState};
pub use negotiator::{Negotiator, Role, Step};
pub use rtc::{RtcEngine, RtcEngineFactory};
