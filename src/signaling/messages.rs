//! Message Types für das Rendezvous-Protokoll
//!
//! Jede Nachricht ist ein Record `{ type, room, payload? }`. Der Server
//! leitet `offer`, `answer`, `candidate` und `leave` unverändert an die
//! anderen Teilnehmer des Raums weiter.

use serde::{Deserialize, Serialize};

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// SDP eines Offers oder Answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
}

/// ICE Candidate im Browser-Format (`RTCIceCandidateInit`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    Join,
    Created,
    Start,
    Full,
    Offer,
    Answer,
    Candidate,
    Leave,
}

/// Alle Nachrichten zwischen Client und Rendezvous-Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Client betritt einen Raum
    Join {
        room: String,
        #[serde(default)]
        payload: JoinPayload,
    },

    /// Server: erster Teilnehmer im Raum (Initiator)
    Created { room: String },

    /// Server: zweiter Teilnehmer ist da, an beide gesendet
    Start { room: String },

    /// Server: Raum ist bereits mit zwei Teilnehmern belegt
    Full { room: String },

    Offer {
        room: String,
        payload: SessionDescription,
    },

    Answer {
        room: String,
        payload: SessionDescription,
    },

    Candidate { room: String, payload: IceCandidate },

    Leave { room: String },
}

impl SignalingMessage {
    pub fn join(room: impl Into<String>, participant: Option<String>) -> Self {
        SignalingMessage::Join {
            room: room.into(),
            payload: JoinPayload { participant },
        }
    }

    pub fn offer(room: impl Into<String>, sdp: impl Into<String>) -> Self {
        SignalingMessage::Offer {
            room: room.into(),
            payload: SessionDescription { sdp: sdp.into() },
        }
    }

    pub fn answer(room: impl Into<String>, sdp: impl Into<String>) -> Self {
        SignalingMessage::Answer {
            room: room.into(),
            payload: SessionDescription { sdp: sdp.into() },
        }
    }

    pub fn candidate(room: impl Into<String>, candidate: IceCandidate) -> Self {
        SignalingMessage::Candidate {
            room: room.into(),
            payload: candidate,
        }
    }

    pub fn leave(room: impl Into<String>) -> Self {
        SignalingMessage::Leave { room: room.into() }
    }

    pub fn room(&self) -> &str {
        match self {
            SignalingMessage::Join { room, .. }
            | SignalingMessage::Created { room }
            | SignalingMessage::Start { room }
            | SignalingMessage::Full { room }
            | SignalingMessage::Offer { room, .. }
            | SignalingMessage::Answer { room, .. }
            | SignalingMessage::Candidate { room, .. }
            | SignalingMessage::Leave { room } => room,
        }
    }

    pub fn tag(&self) -> MessageTag {
        match self {
            SignalingMessage::Join { .. } => MessageTag::Join,
            SignalingMessage::Created { .. } => MessageTag::Created,
            SignalingMessage::Start { .. } => MessageTag::Start,
            SignalingMessage::Full { .. } => MessageTag::Full,
            SignalingMessage::Offer { .. } => MessageTag::Offer,
            SignalingMessage::Answer { .. } => MessageTag::Answer,
            SignalingMessage::Candidate { .. } => MessageTag::Candidate,
            SignalingMessage::Leave { .. } => MessageTag::Leave,
        }
    }

    /// Nachrichten, die der Server an die anderen Raumteilnehmer weiterleitet
    pub fn is_relayed(&self) -> bool {
        matches!(
            self.tag(),
            MessageTag::Offer | MessageTag::Answer | MessageTag::Candidate | MessageTag::Leave
        )
    }
}
