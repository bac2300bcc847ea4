use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::link::{LinkState, NegotiationRole, PeerLink};
use super::transport::{
    PeerTransport, PeerTransportFactory, RemoteTrackInfo, TrackSwap, TransportEvent, TransportState,
};
use crate::error::{LiveError, Result};
use crate::media::{LocalTrack, TrackKind};
use crate::model::ParticipantId;
use crate::signaling::{Envelope, IceCandidate, PresenceMeta, SignalMessage, SignalingChannel};

/// What the manager reports upward to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    StateChanged {
        participant_id: ParticipantId,
        state: LinkState,
    },
    /// The link stayed down past the grace window, or the transport failed
    MediaLost {
        participant_id: ParticipantId,
    },
    RemoteTrack {
        participant_id: ParticipantId,
        track: RemoteTrackInfo,
    },
}

/// A remote we must wait on for an offer.
struct AwaitingOffer {
    meta: PresenceMeta,
    since: Instant,
}

/// Owns one `PeerLink` per remote participant and drives its negotiation.
///
/// The participant with the lexicographically lower id always sends the offers,
/// initial and renegotiation alike, so two peers never offer at each other.
pub struct PeerConnectionManager {
    local: PresenceMeta,
    factory: Arc<dyn PeerTransportFactory>,
    channel: SignalingChannel,
    transport_events: mpsc::UnboundedSender<TransportEvent>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    links: HashMap<ParticipantId, PeerLink>,
    awaiting: HashMap<ParticipantId, AwaitingOffer>,
    pending_candidates: HashMap<ParticipantId, Vec<IceCandidate>>,
    outgoing: HashMap<TrackKind, LocalTrack>,
    link_grace: Duration,
}

impl PeerConnectionManager {
    pub fn new(
        channel: SignalingChannel,
        factory: Arc<dyn PeerTransportFactory>,
        transport_events: mpsc::UnboundedSender<TransportEvent>,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
        link_grace: Duration,
    ) -> Self {
        Self {
            local: channel.me().clone(),
            factory,
            channel,
            transport_events,
            peer_events,
            links: HashMap::new(),
            awaiting: HashMap::new(),
            pending_candidates: HashMap::new(),
            outgoing: HashMap::new(),
            link_grace,
        }
    }

    pub fn initiates_with(&self, remote: &ParticipantId) -> bool {
        self.local.participant_id < *remote
    }

    pub fn link(&self, participant_id: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(participant_id)
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn pending_candidate_count(&self, participant_id: &ParticipantId) -> usize {
        self.pending_candidates.get(participant_id).map(Vec::len).unwrap_or(0)
    }

    pub fn outgoing(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.outgoing.get(&kind)
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.peer_events.send(event);
    }

    /// Reacts to a remote participant appearing on the room topic. Repeats are no-ops.
    pub async fn on_presence_join(&mut self, meta: PresenceMeta) -> Result<()> {
        let remote = meta.participant_id.clone();
        if remote == self.local.participant_id {
            return Ok(());
        }

        if let Some(link) = self.links.get_mut(&remote) {
            link.remote = meta;
            return Ok(());
        }

        // A rejoin of the same user replaces the link of its previous session
        if !meta.user_id.is_empty() {
            let superseded: Vec<ParticipantId> = self
                .links
                .values()
                .filter(|l| l.remote.user_id == meta.user_id)
                .map(|l| l.remote.participant_id.clone())
                .collect();
            for old in superseded {
                tracing::info!(
                    participant_id = %old,
                    replaced_by = %remote,
                    "Reconnect supersedes previous peer link"
                );
                self.drop_link(&old, false).await;
            }
            self.awaiting.retain(|_, a| a.meta.user_id != meta.user_id);
        }

        if self.initiates_with(&remote) {
            self.open_link(meta, NegotiationRole::Initiator).await?;
            self.send_offer(&remote).await
        } else {
            tracing::debug!(participant_id = %remote, "Waiting for offer from remote");
            self.awaiting.insert(
                remote,
                AwaitingOffer {
                    meta,
                    since: Instant::now(),
                },
            );
            Ok(())
        }
    }

    pub async fn remove_participant(&mut self, participant_id: &ParticipantId) {
        self.awaiting.remove(participant_id);
        self.pending_candidates.remove(participant_id);
        self.drop_link(participant_id, false).await;
    }

    /// Negotiation payloads from the signaling channel.
    ///
    /// `sender` is the sender's current presence, if any. A link is only ever
    /// opened for a sender that is present (or that we are awaiting an offer from).
    pub async fn handle_signal(&mut self, envelope: Envelope, sender: Option<PresenceMeta>) -> Result<()> {
        let from = envelope.from.clone();
        match envelope.message {
            SignalMessage::Offer { sdp } => self.handle_offer(&from, sender, &sdp).await,
            SignalMessage::Answer { sdp } => self.handle_answer(&from, &sdp).await,
            SignalMessage::IceCandidate { candidate } => {
                self.handle_ice_candidate(&from, candidate).await;
                Ok(())
            }
            SignalMessage::Renegotiate => self.handle_renegotiate(&from, sender).await,
            _ => Ok(()),
        }
    }

    async fn handle_offer(&mut self, from: &ParticipantId, sender: Option<PresenceMeta>, sdp: &str) -> Result<()> {
        if self.initiates_with(from) {
            tracing::warn!(participant_id = %from, "Ignoring offer from a peer that should be answering");
            return Ok(());
        }

        if !self.links.contains_key(from) {
            let Some(meta) = self.awaiting.remove(from).map(|a| a.meta).or(sender) else {
                tracing::debug!(participant_id = %from, "Offer from participant without presence dropped");
                self.pending_candidates.remove(from);
                return Ok(());
            };
            self.open_link(meta, NegotiationRole::Responder).await?;
        }

        let link = self
            .links
            .get_mut(from)
            .ok_or_else(|| LiveError::PeerLinkNotFound(from.to_string()))?;
        link.transport
            .set_remote_offer(sdp)
            .await
            .map_err(|e| LiveError::SetRemoteDescriptionFailed(e.to_string()))?;
        link.remote_description_set = true;
        let changed = link.transition(LinkState::Connecting);
        let transport = link.transport.clone();

        self.flush_candidates(from, &transport).await;

        let answer = transport
            .create_answer()
            .await
            .map_err(|e| LiveError::CreateAnswerFailed(e.to_string()))?;
        self.channel
            .send_to(from, SignalMessage::Answer { sdp: answer })
            .await?;
        tracing::info!(participant_id = %from, "Answered peer offer");

        if changed {
            self.emit(PeerEvent::StateChanged {
                participant_id: from.clone(),
                state: LinkState::Connecting,
            });
        }
        Ok(())
    }

    async fn handle_answer(&mut self, from: &ParticipantId, sdp: &str) -> Result<()> {
        let Some(link) = self.links.get_mut(from) else {
            tracing::debug!(participant_id = %from, "Answer for unknown link dropped");
            return Ok(());
        };
        if link.role != NegotiationRole::Initiator {
            tracing::warn!(participant_id = %from, "Unexpected answer on responder link");
            return Ok(());
        }

        link.transport
            .set_remote_answer(sdp)
            .await
            .map_err(|e| LiveError::SetRemoteDescriptionFailed(e.to_string()))?;
        link.remote_description_set = true;
        let transport = link.transport.clone();
        tracing::info!(participant_id = %from, "Processed answer from peer");

        self.flush_candidates(from, &transport).await;
        Ok(())
    }

    /// Candidates ahead of the remote description are queued, never dropped.
    async fn handle_ice_candidate(&mut self, from: &ParticipantId, candidate: IceCandidate) {
        match self.links.get(from) {
            Some(link) if link.remote_description_set => {
                if let Err(e) = link.transport.add_ice_candidate(candidate).await {
                    tracing::warn!(participant_id = %from, error = %e, "Failed to add ICE candidate");
                }
            }
            _ => {
                let queue = self.pending_candidates.entry(from.clone()).or_default();
                queue.push(candidate);
                tracing::debug!(
                    participant_id = %from,
                    queue_size = queue.len(),
                    "Queueing ICE candidate until remote description is set"
                );
            }
        }
    }

    async fn flush_candidates(&mut self, from: &ParticipantId, transport: &Arc<dyn PeerTransport>) {
        let Some(candidates) = self.pending_candidates.remove(from) else {
            return;
        };

        tracing::debug!(participant_id = %from, count = candidates.len(), "Flushing queued ICE candidates");
        for candidate in candidates {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                tracing::warn!(participant_id = %from, error = %e, "Failed to add queued ICE candidate");
            }
        }
    }

    async fn handle_renegotiate(&mut self, from: &ParticipantId, sender: Option<PresenceMeta>) -> Result<()> {
        if !self.initiates_with(from) {
            return Ok(());
        }
        if !self.links.contains_key(from) {
            let Some(meta) = sender else {
                tracing::debug!(participant_id = %from, "Renegotiate from participant without presence dropped");
                return Ok(());
            };
            self.open_link(meta, NegotiationRole::Initiator).await?;
        }
        self.send_offer(from).await
    }

    async fn open_link(&mut self, meta: PresenceMeta, role: NegotiationRole) -> Result<()> {
        let remote = meta.participant_id.clone();
        let transport = self
            .factory
            .create(&self.local.participant_id, &remote, self.transport_events.clone())
            .await
            .map_err(|e| LiveError::PeerConnectionCreation(e.to_string()))?;

        for track in self.outgoing.values() {
            if let Err(e) = transport.attach_track(track).await {
                tracing::warn!(participant_id = %remote, track_id = %track.id(), error = %e, "Failed to attach local track");
            }
        }

        tracing::info!(participant_id = %remote, role = ?role, "Peer link created");
        self.links.insert(remote.clone(), PeerLink::new(meta, transport, role));
        self.emit(PeerEvent::StateChanged {
            participant_id: remote,
            state: LinkState::New,
        });
        Ok(())
    }

    async fn send_offer(&mut self, remote: &ParticipantId) -> Result<()> {
        let link = self
            .links
            .get_mut(remote)
            .ok_or_else(|| LiveError::PeerLinkNotFound(remote.to_string()))?;
        let sdp = link
            .transport
            .create_offer()
            .await
            .map_err(|e| LiveError::CreateOfferFailed(e.to_string()))?;
        let changed = link.transition(LinkState::Connecting);

        self.channel.send_to(remote, SignalMessage::Offer { sdp }).await?;
        tracing::info!(participant_id = %remote, "Sent offer to peer");

        if changed {
            self.emit(PeerEvent::StateChanged {
                participant_id: remote.clone(),
                state: LinkState::Connecting,
            });
        }
        Ok(())
    }

    async fn renegotiate(&mut self, remote: &ParticipantId) -> Result<()> {
        if self.initiates_with(remote) {
            self.send_offer(remote).await
        } else {
            self.channel.send_to(remote, SignalMessage::Renegotiate).await
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::LocalCandidate { remote, candidate } => {
                if self.links.contains_key(&remote) {
                    self.channel
                        .send_to(&remote, SignalMessage::IceCandidate { candidate })
                        .await?;
                }
            }
            TransportEvent::StateChanged { remote, state } => {
                let next = match state {
                    TransportState::Connecting => LinkState::Connecting,
                    TransportState::Connected => LinkState::Connected,
                    TransportState::Disconnected => LinkState::Disconnected,
                    TransportState::Failed | TransportState::Closed => {
                        if self.links.contains_key(&remote) {
                            tracing::warn!(participant_id = %remote, state = ?state, "Peer transport went down");
                            self.drop_link(&remote, true).await;
                        }
                        return Ok(());
                    }
                };

                let changed = match self.links.get_mut(&remote) {
                    Some(link) => link.transition(next),
                    None => false,
                };
                if changed {
                    tracing::info!(participant_id = %remote, state = %next, "Peer link state changed");
                    self.emit(PeerEvent::StateChanged {
                        participant_id: remote,
                        state: next,
                    });
                }
            }
            TransportEvent::RemoteTrack { remote, track } => {
                if let Some(link) = self.links.get_mut(&remote) {
                    link.remote_tracks.insert(track.kind, track.clone());
                    self.emit(PeerEvent::RemoteTrack {
                        participant_id: remote,
                        track,
                    });
                }
            }
        }
        Ok(())
    }

    /// Tears down links stuck in `disconnected` beyond the grace window and
    /// re-asks initiators whose offer never arrived.
    pub async fn sweep(&mut self, now: Instant) {
        let expired: Vec<ParticipantId> = self
            .links
            .values()
            .filter(|l| l.state() == LinkState::Disconnected)
            .filter(|l| {
                l.disconnected_since
                    .map(|since| now.saturating_duration_since(since) >= self.link_grace)
                    .unwrap_or(false)
            })
            .map(|l| l.remote.participant_id.clone())
            .collect();

        for participant_id in expired {
            tracing::warn!(participant_id = %participant_id, "Peer link disconnected past grace window");
            self.drop_link(&participant_id, true).await;
        }

        let overdue: Vec<ParticipantId> = self
            .awaiting
            .iter()
            .filter(|(_, a)| now.saturating_duration_since(a.since) >= self.link_grace)
            .map(|(id, _)| id.clone())
            .collect();

        for participant_id in overdue {
            if let Some(awaiting) = self.awaiting.get_mut(&participant_id) {
                awaiting.since = now;
            }
            tracing::debug!(participant_id = %participant_id, "Offer overdue, asking again");
            if let Err(e) = self.channel.send_to(&participant_id, SignalMessage::Renegotiate).await {
                tracing::debug!(participant_id = %participant_id, error = %e, "Offer request failed");
            }
        }
    }

    /// Puts `track` on every link's `kind` sender (or stops sending with `None`).
    /// Links that had to gain a sender are renegotiated.
    pub async fn set_outgoing(&mut self, kind: TrackKind, track: Option<LocalTrack>) {
        match &track {
            Some(t) => {
                self.outgoing.insert(kind, t.clone());
            }
            None => {
                self.outgoing.remove(&kind);
            }
        }

        let remotes: Vec<(ParticipantId, Arc<dyn PeerTransport>)> = self
            .links
            .values()
            .map(|l| (l.remote.participant_id.clone(), l.transport.clone()))
            .collect();

        for (remote, transport) in remotes {
            match transport.replace_track(kind, track.as_ref()).await {
                Ok(TrackSwap::Added) => {
                    tracing::info!(participant_id = %remote, kind = %kind, "Sender added, renegotiating");
                    if let Err(e) = self.renegotiate(&remote).await {
                        tracing::warn!(participant_id = %remote, error = %e, "Renegotiation failed");
                    }
                }
                Ok(TrackSwap::Replaced) | Ok(TrackSwap::Unchanged) => {}
                Err(e) => {
                    tracing::warn!(participant_id = %remote, kind = %kind, error = %e, "Failed to swap outgoing track");
                }
            }
        }
    }

    async fn drop_link(&mut self, participant_id: &ParticipantId, media_lost: bool) {
        self.pending_candidates.remove(participant_id);
        let Some(mut link) = self.links.remove(participant_id) else {
            return;
        };

        link.transition(LinkState::Closed);
        link.transport.close().await;
        tracing::info!(participant_id = %participant_id, media_lost, "Peer link closed");

        self.emit(PeerEvent::StateChanged {
            participant_id: participant_id.clone(),
            state: LinkState::Closed,
        });
        if media_lost {
            self.emit(PeerEvent::MediaLost {
                participant_id: participant_id.clone(),
            });
        }
    }

    /// Closes every link. Local tracks stay owned by the caller.
    pub async fn close_all(&mut self) {
        let remotes: Vec<ParticipantId> = self.links.keys().cloned().collect();
        for remote in remotes {
            self.drop_link(&remote, false).await;
        }
        self.awaiting.clear();
        self.pending_candidates.clear();
        self.outgoing.clear();
    }
}
