//! Bidirektionaler Kanal zum Rendezvous-Server
//!
//! Verwaltet die Verbindung zum Server:
//! - WebSocket oder In-Memory-Transport
//! - Ein Read-Task, ein Write-Task
//! - Event-basierte Zustellung eingehender Nachrichten

use super::messages::SignalingMessage;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Wie lange `close()` auf das Ausliefern bereits gesendeter Nachrichten wartet
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

const OUTGOING_CAPACITY: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out connecting to {0}")]
    Timeout(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Room {0} already has two participants")]
    RoomFull(String),

    #[error("Signaling channel dropped")]
    Dropped,
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events, die der SignalingChannel auslöst
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(SignalingMessage),

    /// Verbindung vom Server oder Netzwerk getrennt (nicht nach `close()`)
    Disconnected,
}

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

/// Kanal zu genau einem Rendezvous-Server
///
/// Subscriber müssen sich vor dem ersten `send` registrieren; der Server
/// schickt nichts, bevor der Client einem Raum beigetreten ist.
pub struct SignalingChannel {
    server_url: String,
    tx: Mutex<Option<mpsc::Sender<SignalingMessage>>>,
    event_tx: broadcast::Sender<SignalingEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SignalingChannel {
    /// Verbindet per WebSocket mit dem Server
    pub async fn open(
        server_url: &str,
        capacity: usize,
        timeout: Duration,
    ) -> Result<Self, SignalingError> {
        tracing::info!("Connecting to signaling server: {}", server_url);

        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(server_url))
            .await
            .map_err(|_| SignalingError::Timeout(server_url.to_string()))?
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<SignalingMessage>(OUTGOING_CAPACITY);
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        let reader_events = event_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                        Ok(msg) => {
                            tracing::debug!("Received {:?} for room {}", msg.tag(), msg.room());
                            let _ = reader_events.send(SignalingEvent::Message(msg));
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring unparseable signaling frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            let _ = reader_events.send(SignalingEvent::Disconnected);
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode signaling message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
        });

        Ok(Self::assemble(server_url, tx, event_tx, reader, writer))
    }

    /// Kanal über In-Memory-Queues (z.B. zum RendezvousHub)
    pub fn from_transport(
        label: &str,
        outbound: mpsc::UnboundedSender<SignalingMessage>,
        mut inbound: mpsc::UnboundedReceiver<SignalingMessage>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SignalingMessage>(OUTGOING_CAPACITY);
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        let reader_events = event_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                let _ = reader_events.send(SignalingEvent::Message(msg));
            }
            let _ = reader_events.send(SignalingEvent::Disconnected);
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if outbound.send(msg).is_err() {
                    break;
                }
            }
        });

        Self::assemble(label, tx, event_tx, reader, writer)
    }

    fn assemble(
        server_url: &str,
        tx: mpsc::Sender<SignalingMessage>,
        event_tx: broadcast::Sender<SignalingEvent>,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    ) -> Self {
        Self {
            server_url: server_url.to_string(),
            tx: Mutex::new(Some(tx)),
            event_tx,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sendet eine Nachricht; Reihenfolge bleibt pro Kanal erhalten
    pub async fn send(&self, msg: SignalingMessage) -> Result<(), SignalingError> {
        let tx = self.tx.lock().clone().ok_or(SignalingError::NotConnected)?;
        tracing::debug!("Sending {:?} for room {}", msg.tag(), msg.room());
        tx.send(msg)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Schließt den Kanal (idempotent)
    ///
    /// Bereits gesendete Nachrichten werden noch ausgeliefert, danach wird
    /// die Verbindung geschlossen.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        // Sender droppen, damit der Write-Task ausläuft
        drop(self.tx.lock().take());

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
                tracing::warn!("Signaling writer did not flush in time");
            }
        }

        tracing::info!("Signaling channel to {} closed", self.server_url);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("server_url", &self.server_url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Öffnet Signaling-Kanäle
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn open(&self, server_url: &str) -> Result<SignalingChannel, SignalingError>;
}

/// Öffnet WebSocket-Kanäle
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    pub capacity: usize,
    pub timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self { capacity, timeout }
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn open(&self, server_url: &str) -> Result<SignalingChannel, SignalingError> {
        SignalingChannel::open(server_url, self.capacity, self.timeout).await
    }
}
