use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::channel::RealtimeTransport;
use super::message::{Envelope, PresenceMeta, RelayFrame};
use crate::error::{LiveError, Result};
use crate::model::ParticipantId;

type SessionKey = (String, ParticipantId);

/// Realtime transport speaking to the `live-relay` server, one socket per subscription.
pub struct WsRealtimeTransport {
    url: String,
    sessions: Arc<Mutex<HashMap<SessionKey, mpsc::UnboundedSender<Message>>>>,
}

impl WsRealtimeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn frame(frame: &RelayFrame) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(frame)?))
    }

    async fn session(&self, topic: &str, participant_id: &ParticipantId) -> Result<mpsc::UnboundedSender<Message>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(topic.to_string(), participant_id.clone()))
            .cloned()
            .ok_or(LiveError::ChannelClosed)
    }
}

#[async_trait]
impl RealtimeTransport for WsRealtimeTransport {
    async fn subscribe(&self, topic: &str, meta: PresenceMeta) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| LiveError::NetworkError(format!("Failed to connect to {}: {}", self.url, e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let join = Self::frame(&RelayFrame::Join {
            topic: topic.to_string(),
            meta: meta.clone(),
        })?;
        ws_sender
            .send(join)
            .await
            .map_err(|e| LiveError::NetworkError(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sender.send(message).await {
                    tracing::debug!(error = %e, "Relay socket send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let key = (topic.to_string(), meta.participant_id.clone());
        self.sessions.lock().await.insert(key.clone(), out_tx);

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                let text = match result {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay socket error");
                        break;
                    }
                };

                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Deliver { envelope }) => {
                        if in_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Ok(RelayFrame::Error { message }) => {
                        tracing::warn!(error = %message, "Relay reported an error");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, raw_message = %text, "Failed to parse relay frame"),
                }
            }
            sessions.lock().await.remove(&key);
        });

        tracing::info!(url = %self.url, topic = %topic, "Connected to relay");
        Ok(in_rx)
    }

    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        let sender = self.session(topic, &envelope.from).await?;
        let frame = Self::frame(&RelayFrame::Publish { envelope })?;
        sender.send(frame).map_err(|_| LiveError::ChannelClosed)
    }

    async fn unsubscribe(&self, topic: &str, participant_id: &ParticipantId) -> Result<()> {
        let sender = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&(topic.to_string(), participant_id.clone()))
        };

        if let Some(sender) = sender {
            let _ = sender.send(Self::frame(&RelayFrame::Leave)?);
            let _ = sender.send(Message::Close(None));
        }
        Ok(())
    }
}
