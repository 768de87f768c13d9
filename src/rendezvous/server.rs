//! WebSocket-Frontend des Rendezvous-Servers

use super::hub::RendezvousHub;
use crate::signaling::SignalingMessage;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Nimmt WebSocket-Clients an, bis der Listener fehlschlägt
pub async fn serve(listener: TcpListener, hub: RendezvousHub) -> std::io::Result<()> {
    tracing::info!("Rendezvous server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            handle_connection(stream, addr, hub).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: RendezvousHub) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();
    let client = hub.register(tx);
    tracing::info!("Client {} connected from {}", client, addr);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode message for client {}: {}", client, e);
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                Ok(msg) => hub.dispatch(client, msg),
                Err(e) => tracing::warn!("Client {} sent unparseable frame: {}", client, e),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error from client {}: {}", client, e);
                break;
            }
            _ => {}
        }
    }

    hub.disconnect(client);
    writer.abort();
    tracing::info!("Client {} disconnected", client);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{SignalingChannel, SignalingEvent};
    use std::time::Duration;

    async fn next_message(
        events: &mut tokio::sync::broadcast::Receiver<SignalingEvent>,
    ) -> SignalingMessage {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for signaling message")
                .expect("event channel closed");
            if let SignalingEvent::Message(msg) = event {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn websocket_clients_rendezvous_and_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, RendezvousHub::new()));

        let a = SignalingChannel::open(&url, 16, Duration::from_secs(5)).await.unwrap();
        let b = SignalingChannel::open(&url, 16, Duration::from_secs(5)).await.unwrap();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();

        a.send(SignalingMessage::join("r1", None)).await.unwrap();
        assert_eq!(
            next_message(&mut a_events).await,
            SignalingMessage::Created { room: "r1".into() }
        );

        b.send(SignalingMessage::join("r1", None)).await.unwrap();
        assert_eq!(
            next_message(&mut a_events).await,
            SignalingMessage::Start { room: "r1".into() }
        );
        assert_eq!(
            next_message(&mut b_events).await,
            SignalingMessage::Start { room: "r1".into() }
        );

        a.send(SignalingMessage::offer("r1", "A1")).await.unwrap();
        assert_eq!(
            next_message(&mut b_events).await,
            SignalingMessage::offer("r1", "A1")
        );

        a.close().await;
        assert_eq!(next_message(&mut b_events).await, SignalingMessage::leave("r1"));
        b.close().await;
    }
}
