//! Raumverwaltung des Rendezvous-Servers
//!
//! Der erste Teilnehmer eines Raums erhält `created`, sobald ein zweiter
//! beitritt, erhalten beide `start`. Ein dritter Teilnehmer wird mit
//! `full` abgewiesen.

use crate::signaling::{SignalingChannel, SignalingMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Maximale Teilnehmer pro Raum
pub const ROOM_CAPACITY: usize = 2;

pub type ClientId = u64;

#[derive(Debug, Default)]
struct HubState {
    /// Raum -> Teilnehmer in Beitrittsreihenfolge
    rooms: HashMap<String, Vec<ClientId>>,
    clients: HashMap<ClientId, mpsc::UnboundedSender<SignalingMessage>>,
}

impl HubState {
    fn deliver(&self, client: ClientId, msg: SignalingMessage) {
        if let Some(tx) = self.clients.get(&client) {
            let _ = tx.send(msg);
        }
    }

    fn others(&self, room: &str, sender: ClientId) -> Vec<ClientId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().filter(|c| *c != sender).collect())
            .unwrap_or_default()
    }

    fn remove_from_room(&mut self, room: &str, client: ClientId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.retain(|c| *c != client);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Rendezvous-Logik, unabhängig vom Transport
#[derive(Clone, Default)]
pub struct RendezvousHub {
    state: Arc<Mutex<HubState>>,
    next_id: Arc<AtomicU64>,
}

impl RendezvousHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registriert einen Client; ausgehende Nachrichten landen in `tx`
    pub fn register(&self, tx: mpsc::UnboundedSender<SignalingMessage>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().clients.insert(id, tx);
        tracing::debug!("Client {} registered", id);
        id
    }

    /// Verarbeitet eine Nachricht eines Clients
    pub fn dispatch(&self, client: ClientId, msg: SignalingMessage) {
        let mut state = self.state.lock();

        match msg {
            SignalingMessage::Join { room, payload } => {
                let members = state.rooms.entry(room.clone()).or_default();
                if members.contains(&client) {
                    tracing::debug!("Client {} joined {} twice", client, room);
                    return;
                }
                if members.len() >= ROOM_CAPACITY {
                    tracing::warn!("Rejecting client {} from full room {}", client, room);
                    state.deliver(client, SignalingMessage::Full { room });
                    return;
                }

                members.push(client);
                let occupants = members.clone();
                tracing::info!(
                    "Client {} ({:?}) joined room {} ({} occupants)",
                    client,
                    payload.participant,
                    room,
                    occupants.len()
                );

                if occupants.len() == 1 {
                    state.deliver(client, SignalingMessage::Created { room });
                } else {
                    for member in occupants {
                        state.deliver(member, SignalingMessage::Start { room: room.clone() });
                    }
                }
            }

            msg if msg.is_relayed() => {
                let room = msg.room().to_string();
                let is_member = state
                    .rooms
                    .get(&room)
                    .is_some_and(|members| members.contains(&client));
                if !is_member {
                    tracing::warn!("Dropping {:?} from client {} outside room {}", msg.tag(), client, room);
                    return;
                }

                for other in state.others(&room, client) {
                    state.deliver(other, msg.clone());
                }

                if matches!(msg, SignalingMessage::Leave { .. }) {
                    state.remove_from_room(&room, client);
                    tracing::info!("Client {} left room {}", client, room);
                }
            }

            other => {
                tracing::warn!("Ignoring server-only message {:?} from client {}", other.tag(), client);
            }
        }
    }

    /// Verbindung getrennt: wie `leave` für jeden Raum des Clients
    pub fn disconnect(&self, client: ClientId) {
        let mut state = self.state.lock();
        state.clients.remove(&client);

        let rooms: Vec<String> = state
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(&client))
            .map(|(room, _)| room.clone())
            .collect();

        for room in rooms {
            for other in state.others(&room, client) {
                state.deliver(other, SignalingMessage::leave(room.clone()));
            }
            state.remove_from_room(&room, client);
        }
        tracing::debug!("Client {} disconnected", client);
    }

    /// Anzahl der Teilnehmer eines Raums
    pub fn occupants(&self, room: &str) -> usize {
        self.state.lock().rooms.get(room).map_or(0, Vec::len)
    }

    /// In-Memory-Kanal, der direkt an diesem Hub hängt
    pub fn connect(&self, capacity: usize) -> SignalingChannel {
        let (to_client, client_inbound) = mpsc::unbounded_channel();
        let (client_outbound, mut from_client) = mpsc::unbounded_channel();
        let id = self.register(to_client);

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = from_client.recv().await {
                hub.dispatch(id, msg);
            }
            hub.disconnect(id);
        });

        SignalingChannel::from_transport(
            &format!("memory://client-{id}"),
            client_outbound,
            client_inbound,
            capacity,
        )
    }
}

impl std::fmt::Debug for RendezvousHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RendezvousHub")
            .field("rooms", &state.rooms)
            .field("clients", &state.clients.len())
            .finish()
    }
}
