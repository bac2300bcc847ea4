use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use super::channel::RealtimeTransport;
use super::message::{Envelope, PresenceMeta};
use crate::error::Result;
use crate::model::ParticipantId;

struct Member {
    meta: PresenceMeta,
    sender: mpsc::UnboundedSender<Envelope>,
}

/// In-process realtime pub/sub with presence tracking.
///
/// A new subscriber first receives a `presence-join` for every current member,
/// then everyone else is told about it. Broadcasts never echo to their sender.
pub struct MemoryHub {
    topics: Arc<RwLock<HashMap<String, HashMap<ParticipantId, Member>>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub async fn members(&self, topic: &str) -> Vec<PresenceMeta> {
        let topics = self.topics.read().await;
        let mut members: Vec<_> = topics
            .get(topic)
            .map(|m| m.values().map(|member| member.meta.clone()).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        members
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Delivers to every member except `except`; returns members whose receiver is gone.
    fn fan_out(
        members: &HashMap<ParticipantId, Member>,
        envelope: &Envelope,
        except: &ParticipantId,
    ) -> Vec<ParticipantId> {
        let mut dead = Vec::new();
        for (id, member) in members.iter().filter(|(id, _)| *id != except) {
            if member.sender.send(envelope.clone()).is_err() {
                dead.push(id.clone());
            }
        }
        dead
    }

    /// Removes vanished subscribers and tells the rest they left.
    fn prune(members: &mut HashMap<ParticipantId, Member>, mut dead: Vec<ParticipantId>) {
        while let Some(id) = dead.pop() {
            if let Some(member) = members.remove(&id) {
                tracing::debug!(participant_id = %id, "Dropping closed subscriber");
                let leave = Envelope::presence_leave(&member.meta);
                dead.extend(Self::fan_out(members, &leave, &id));
            }
        }
    }
}

#[async_trait]
impl RealtimeTransport for MemoryHub {
    async fn subscribe(&self, topic: &str, meta: PresenceMeta) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut topics = self.topics.write().await;
        let members = topics.entry(topic.to_string()).or_default();

        for member in members.values().filter(|m| m.meta.participant_id != meta.participant_id) {
            let _ = sender.send(Envelope::presence_join(&member.meta));
        }

        let join = Envelope::presence_join(&meta);
        let dead = Self::fan_out(members, &join, &meta.participant_id);
        members.insert(
            meta.participant_id.clone(),
            Member {
                meta: meta.clone(),
                sender,
            },
        );
        Self::prune(members, dead);

        tracing::info!(
            topic = %topic,
            participant_id = %meta.participant_id,
            members = members.len(),
            "Subscriber joined topic"
        );
        Ok(receiver)
    }

    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        let mut topics = self.topics.write().await;
        let Some(members) = topics.get_mut(topic) else {
            return Ok(());
        };

        let dead = match &envelope.target {
            Some(target) => match members.get(target) {
                Some(member) if member.sender.send(envelope.clone()).is_err() => vec![target.clone()],
                Some(_) => Vec::new(),
                None => {
                    tracing::debug!(target = %target, "Dropping message for absent participant");
                    Vec::new()
                }
            },
            None => Self::fan_out(members, &envelope, &envelope.from),
        };
        Self::prune(members, dead);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, participant_id: &ParticipantId) -> Result<()> {
        let mut topics = self.topics.write().await;
        let Some(members) = topics.get_mut(topic) else {
            return Ok(());
        };

        if let Some(member) = members.remove(participant_id) {
            let leave = Envelope::presence_leave(&member.meta);
            let dead = Self::fan_out(members, &leave, participant_id);
            Self::prune(members, dead);
            tracing::info!(topic = %topic, participant_id = %participant_id, "Subscriber left topic");
        }

        if members.is_empty() {
            topics.remove(topic);
        }
        Ok(())
    }
}
