use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warp::ws::{Message, WebSocket};

use crate::error::Result;
use crate::signaling::{MemoryHub, PresenceMeta, RealtimeTransport, RelayFrame};

pub async fn handle_relay_websocket(websocket: WebSocket, hub: Arc<MemoryHub>) {
    tracing::info!("New relay WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut connection = RelayConnection::new(hub, tx);

    // Spawn task to send frames to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) if message.is_close() => break,
            Ok(message) => match connection.handle_message(message).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Error handling WebSocket message");
                    break;
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    connection.cleanup().await;
    sender_task.abort();
    tracing::info!("Relay WebSocket connection closed");
}

struct Membership {
    topic: String,
    meta: PresenceMeta,
    forwarder: JoinHandle<()>,
}

/// One client socket's relay state: at most one topic membership.
struct RelayConnection {
    hub: Arc<MemoryHub>,
    tx: mpsc::UnboundedSender<Message>,
    membership: Option<Membership>,
}

impl RelayConnection {
    fn new(hub: Arc<MemoryHub>, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            hub,
            tx,
            membership: None,
        }
    }

    /// Returns `false` once the client has asked to leave.
    async fn handle_message(&mut self, message: Message) -> Result<bool> {
        let Ok(text) = message.to_str() else {
            return Ok(true);
        };

        match serde_json::from_str::<RelayFrame>(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => {
                tracing::error!(error = %e, raw_message = %text, "Failed to parse relay frame");
                self.send_error("malformed frame")?;
                Ok(true)
            }
        }
    }

    async fn handle_frame(&mut self, frame: RelayFrame) -> Result<bool> {
        match frame {
            RelayFrame::Join { topic, meta } => {
                if self.membership.is_some() {
                    self.send_error("already joined")?;
                    return Ok(true);
                }

                let mut inbound = self.hub.subscribe(&topic, meta.clone()).await?;
                let tx = self.tx.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(envelope) = inbound.recv().await {
                        let text = match serde_json::to_string(&RelayFrame::Deliver { envelope }) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to encode relay frame");
                                continue;
                            }
                        };
                        if tx.send(Message::text(text)).is_err() {
                            break;
                        }
                    }
                });

                tracing::info!(topic = %topic, participant_id = %meta.participant_id, "Client joined topic");
                self.membership = Some(Membership { topic, meta, forwarder });
                Ok(true)
            }
            RelayFrame::Publish { mut envelope } => {
                let Some(membership) = &self.membership else {
                    self.send_error("publish before join")?;
                    return Ok(true);
                };

                // Clients may only speak as themselves
                envelope.from = membership.meta.participant_id.clone();
                envelope.from_name = membership.meta.display_name.clone();
                self.hub.publish(&membership.topic, envelope).await?;
                Ok(true)
            }
            RelayFrame::Leave => {
                self.cleanup().await;
                Ok(false)
            }
            RelayFrame::Deliver { .. } | RelayFrame::Error { .. } => {
                tracing::warn!("Ignoring server-only frame from client");
                Ok(true)
            }
        }
    }

    fn send_error(&self, message: &str) -> Result<()> {
        let frame = serde_json::to_string(&RelayFrame::Error {
            message: message.to_string(),
        })?;
        let _ = self.tx.send(Message::text(frame));
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(membership) = self.membership.take() {
            membership.forwarder.abort();
            if let Err(e) = self
                .hub
                .unsubscribe(&membership.topic, &membership.meta.participant_id)
                .await
            {
                tracing::warn!(error = %e, topic = %membership.topic, "Failed to leave topic");
            }
        }
    }
}
