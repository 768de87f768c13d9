//! Offer/Answer-Protokoll zwischen zwei Teilnehmern
//!
//! Ablauf:
//! 1. `created` macht diesen Client zum Initiator
//! 2. `start` löst beim Initiator das Offer aus
//! 3. Der andere Client beantwortet das Offer
//! 4. Der Initiator übernimmt das Answer
//! 5. Candidates vor der Remote Description werden gepuffert
//!
//! Unpassende Nachrichten liefern einen `NegotiationError`, den der
//! Aufrufer protokolliert und verwirft.

use super::engine::{NegotiationEngine, NegotiationError};
use crate::signaling::{IceCandidate, MessageTag, SignalingMessage};
use std::sync::Arc;

/// Rolle im Raum, bestimmt durch die Beitrittsreihenfolge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Noch kein `created`/`start` erhalten
    Pending,
    Initiator,
    Responder,
}

/// Was der Aufrufer nach einer Nachricht tun muss
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Nothing,
    Reply(SignalingMessage),
    PeerLeft,
    RoomFull,
}

pub struct Negotiator {
    room: String,
    engine: Arc<dyn NegotiationEngine>,
    role: Role,
    offer_sent: bool,
    answer_sent: bool,
    remote_applied: bool,
    pending: Vec<IceCandidate>,
}

impl Negotiator {
    pub fn new(room: impl Into<String>, engine: Arc<dyn NegotiationEngine>) -> Self {
        Self {
            room: room.into(),
            engine,
            role: Role::Pending,
            offer_sent: false,
            answer_sent: false,
            remote_applied: false,
            pending: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    /// Anzahl gepufferter Candidates
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Verarbeitet eine eingehende Nachricht
    pub async fn handle(&mut self, msg: SignalingMessage) -> Result<Step, NegotiationError> {
        if msg.room() != self.room {
            return Err(NegotiationError::RoomMismatch {
                expected: self.room.clone(),
                received: msg.room().to_string(),
            });
        }

        match msg {
            SignalingMessage::Join { .. } => Err(NegotiationError::Unexpected {
                tag: MessageTag::Join,
                reason: "join is only sent by clients",
            }),

            SignalingMessage::Created { .. } => {
                if self.role == Role::Responder {
                    return Err(NegotiationError::Unexpected {
                        tag: MessageTag::Created,
                        reason: "already joined as responder",
                    });
                }
                tracing::info!("Joined room {} as initiator, waiting for peer", self.room);
                self.role = Role::Initiator;
                Ok(Step::Nothing)
            }

            SignalingMessage::Start { .. } => self.on_start().await,

            SignalingMessage::Full { .. } => Ok(Step::RoomFull),

            SignalingMessage::Offer { payload, .. } => self.on_offer(payload.sdp).await,

            SignalingMessage::Answer { payload, .. } => self.on_answer(payload.sdp).await,

            SignalingMessage::Candidate { payload, .. } => {
                self.on_candidate(payload).await;
                Ok(Step::Nothing)
            }

            SignalingMessage::Leave { .. } => {
                tracing::info!("Peer left room {}", self.room);
                Ok(Step::PeerLeft)
            }
        }
    }

    async fn on_start(&mut self) -> Result<Step, NegotiationError> {
        match self.role {
            Role::Initiator if self.offer_sent => Err(NegotiationError::Duplicate(MessageTag::Start)),
            Role::Initiator => {
                let sdp = self.engine.create_offer().await?;
                self.offer_sent = true;
                tracing::info!("Sending offer to room {}", self.room);
                Ok(Step::Reply(SignalingMessage::offer(self.room.clone(), sdp)))
            }
            Role::Pending | Role::Responder => {
                self.role = Role::Responder;
                tracing::info!("Peer present in room {}, waiting for offer", self.room);
                Ok(Step::Nothing)
            }
        }
    }

    async fn on_offer(&mut self, sdp: String) -> Result<Step, NegotiationError> {
        if self.role == Role::Initiator {
            return Err(NegotiationError::Unexpected {
                tag: MessageTag::Offer,
                reason: "initiator does not accept offers",
            });
        }
        if self.answer_sent {
            return Err(NegotiationError::Duplicate(MessageTag::Offer));
        }

        self.role = Role::Responder;
        let answer = self.engine.accept_offer(sdp).await?;
        self.answer_sent = true;
        self.remote_applied = true;
        self.flush_pending().await;

        tracing::info!("Sending answer to room {}", self.room);
        Ok(Step::Reply(SignalingMessage::answer(self.room.clone(), answer)))
    }

    async fn on_answer(&mut self, sdp: String) -> Result<Step, NegotiationError> {
        if self.role != Role::Initiator {
            return Err(NegotiationError::Unexpected {
                tag: MessageTag::Answer,
                reason: "only the initiator accepts answers",
            });
        }
        if !self.offer_sent {
            return Err(NegotiationError::Unexpected {
                tag: MessageTag::Answer,
                reason: "no offer was sent",
            });
        }
        if self.remote_applied {
            return Err(NegotiationError::Duplicate(MessageTag::Answer));
        }

        self.engine.accept_answer(sdp).await?;
        self.remote_applied = true;
        self.flush_pending().await;
        Ok(Step::Nothing)
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_applied {
            tracing::debug!("Queueing candidate until remote description is set");
            self.pending.push(candidate);
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn flush_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            tracing::debug!("Applying {} queued candidates", pending.len());
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
    }

    // Einzelne Candidate-Fehler sind während ICE normal
    async fn apply_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.engine.add_ice_candidate(candidate).await {
            tracing::debug!("Ignoring candidate: {}", e);
        }
    }
}
