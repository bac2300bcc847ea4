use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::message::{Envelope, PresenceMeta, SignalMessage};
use crate::error::{LiveError, Result};
use crate::model::{ParticipantId, RoomId};

/// Hosted publish/subscribe service with presence, one topic per room.
///
/// Delivery is best-effort and at-most-once; ordering holds only per sender.
/// Implementations emit `presence-join`/`presence-leave` envelopes themselves.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn subscribe(&self, topic: &str, meta: PresenceMeta) -> Result<mpsc::UnboundedReceiver<Envelope>>;

    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()>;

    async fn unsubscribe(&self, topic: &str, participant_id: &ParticipantId) -> Result<()>;
}

pub fn room_topic(room_id: &RoomId) -> String {
    format!("live-room:{}", room_id)
}

/// Signaling for one room as seen by the local participant.
#[derive(Clone)]
pub struct SignalingChannel {
    transport: Arc<dyn RealtimeTransport>,
    topic: String,
    me: PresenceMeta,
    open: Arc<AtomicBool>,
    leave_timeout: Duration,
}

impl SignalingChannel {
    pub async fn join(
        transport: Arc<dyn RealtimeTransport>,
        room_id: &RoomId,
        me: PresenceMeta,
        leave_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Envelope>)> {
        let topic = room_topic(room_id);
        let inbound = transport
            .subscribe(&topic, me.clone())
            .await
            .map_err(|e| LiveError::ChannelUnavailable(e.to_string()))?;

        tracing::info!(
            topic = %topic,
            participant_id = %me.participant_id,
            "Signaling channel joined"
        );

        Ok((
            Self {
                transport,
                topic,
                me,
                open: Arc::new(AtomicBool::new(true)),
                leave_timeout,
            },
            inbound,
        ))
    }

    pub fn me(&self) -> &PresenceMeta {
        &self.me
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub async fn send(&self, target: Option<&ParticipantId>, message: SignalMessage) -> Result<()> {
        if !self.is_open() {
            return Err(LiveError::ChannelClosed);
        }
        if target.is_none() && message.is_negotiation() {
            return Err(LiveError::InvalidSignalingMessage(
                "negotiation payloads need a target".to_string(),
            ));
        }

        let envelope = Envelope::new(&self.me, target.cloned(), message);
        self.transport.publish(&self.topic, envelope).await
    }

    pub async fn broadcast(&self, message: SignalMessage) -> Result<()> {
        self.send(None, message).await
    }

    pub async fn send_to(&self, target: &ParticipantId, message: SignalMessage) -> Result<()> {
        self.send(Some(target), message).await
    }

    /// Announces departure without waiting longer than the leave timeout, then
    /// closes the handle whatever happened. Repeated calls do nothing.
    pub async fn leave(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        let departure = self.transport.unsubscribe(&self.topic, &self.me.participant_id);
        match tokio::time::timeout(self.leave_timeout, departure).await {
            Ok(Ok(())) => tracing::info!(topic = %self.topic, "Signaling channel left"),
            Ok(Err(e)) => tracing::warn!(topic = %self.topic, error = %e, "Presence leave failed"),
            Err(_) => tracing::warn!(topic = %self.topic, "Presence leave timed out"),
        }
    }
}
