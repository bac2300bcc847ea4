use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::command::{SessionCommand, SessionRequest};
use super::events::{LinkSummary, MembershipState, SessionEvent, SessionSnapshot};
use crate::config::SessionConfig;
use crate::error::{LiveError, Result, Severity};
use crate::media::{AudioMeter, LocalStream, LocalTrack, MediaCapture, MediaConstraints, TrackKind, TrackSource};
use crate::model::{now_millis, MediaFlags, ParticipantId, ParticipantRecord, Role, RoomRecord, RoomStatus};
use crate::peer::{PeerConnectionManager, PeerEvent, PeerTransportFactory, TransportEvent};
use crate::presence::{PresenceEvent, PresenceReconciler};
use crate::signaling::{ChatMessage, Envelope, ModerationAction, Reaction, SignalMessage, SignalingChannel};
use crate::store::RecordStore;

/// Why the actor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Left,
    HandleDropped,
    RoomEnded,
    Removed,
    ChannelLost,
}

enum Flow {
    Continue,
    Stop(StopReason),
}

pub(crate) struct SessionParts {
    pub room: RoomRecord,
    pub me: ParticipantRecord,
    pub store: Arc<dyn RecordStore>,
    pub capture: MediaCapture,
    pub stream: LocalStream,
    pub channel: SignalingChannel,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
    pub commands: mpsc::UnboundedReceiver<SessionRequest>,
    pub peers: Arc<dyn PeerTransportFactory>,
    pub events: broadcast::Sender<SessionEvent>,
    pub config: SessionConfig,
}

/// The per-session actor. Owns every piece of session state; the handle talks
/// to it only through commands.
pub(crate) struct RoomSession {
    room: RoomRecord,
    me: ParticipantRecord,
    store: Arc<dyn RecordStore>,
    capture: MediaCapture,
    stream: LocalStream,
    screen: Option<LocalTrack>,
    channel: SignalingChannel,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    commands: mpsc::UnboundedReceiver<SessionRequest>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    peers: PeerConnectionManager,
    presence: PresenceReconciler,
    meter: AudioMeter,
    events: broadcast::Sender<SessionEvent>,
    config: SessionConfig,
    membership: MembershipState,
}

impl RoomSession {
    pub(crate) fn new(parts: SessionParts) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let peers = PeerConnectionManager::new(
            parts.channel.clone(),
            parts.peers,
            transport_tx,
            peer_tx,
            parts.config.link_grace,
        );
        let presence = PresenceReconciler::new(parts.me.id.clone(), parts.config.presence_grace);

        Self {
            room: parts.room,
            me: parts.me,
            store: parts.store,
            capture: parts.capture,
            stream: parts.stream,
            screen: None,
            channel: parts.channel,
            inbound: parts.inbound,
            commands: parts.commands,
            transport_rx,
            peer_rx,
            peers,
            presence,
            meter: AudioMeter::default(),
            events: parts.events,
            config: parts.config,
            membership: MembershipState::Joined,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn notice(&self, severity: Severity, message: impl Into<String>) {
        self.emit(SessionEvent::Notice {
            severity,
            message: message.into(),
        });
    }

    fn emit_roster(&self) {
        self.emit(SessionEvent::ParticipantListChanged {
            participants: self.presence.roster(),
        });
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(
            room_id = %self.room.id,
            participant_id = %self.me.id,
            role = ?self.me.role,
            "Room session started"
        );
        self.start().await;

        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let metering = self.config.meter_interval.is_some();
        let mut meter = tokio::time::interval(self.config.meter_interval.unwrap_or(Duration::from_secs(3600)));
        meter.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut leave_reply: Option<oneshot::Sender<()>> = None;

        let reason = loop {
            let flow = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionRequest::Leave(reply)) => {
                        leave_reply = Some(reply);
                        Flow::Stop(StopReason::Left)
                    }
                    Some(SessionRequest::Command(cmd)) => self.handle_command(cmd).await,
                    None => Flow::Stop(StopReason::HandleDropped),
                },

                envelope = self.inbound.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope).await,
                    None => Flow::Stop(StopReason::ChannelLost),
                },

                Some(event) = self.transport_rx.recv() => {
                    if let Err(e) = self.peers.handle_transport_event(event).await {
                        tracing::warn!(error = %e, "Failed to handle transport event");
                    }
                    Flow::Continue
                }

                Some(event) = self.peer_rx.recv() => {
                    self.handle_peer_event(event);
                    Flow::Continue
                }

                _ = reconcile.tick() => self.reconcile().await,

                _ = meter.tick(), if metering => {
                    self.sample_meter();
                    Flow::Continue
                }
            };

            if let Flow::Stop(reason) = flow {
                break reason;
            }
        };

        self.teardown(reason).await;
        if let Some(reply) = leave_reply {
            let _ = reply.send(());
        }
    }

    async fn start(&mut self) {
        let me = self.channel.me().clone();
        self.presence.apply(PresenceEvent::Join(me));

        for track in self.stream.tracks().to_vec() {
            self.peers.set_outgoing(track.kind(), Some(track)).await;
        }

        match self.store.open_participants(&self.room.id).await {
            Ok(records) => {
                self.presence.sync_records(records);
            }
            Err(e) => tracing::warn!(room_id = %self.room.id, error = %e, "Failed to load participant records"),
        }
        self.emit(SessionEvent::RoomStatusChanged {
            status: self.room.status,
        });
        self.emit_roster();
    }

    /// Runs once, after the loop, whatever ended it.
    async fn teardown(&mut self, reason: StopReason) {
        tracing::info!(
            room_id = %self.room.id,
            participant_id = %self.me.id,
            reason = ?reason,
            "Tearing down room session"
        );

        if reason == StopReason::ChannelLost {
            self.notice(Severity::Fatal, LiveError::ChannelClosed.to_string());
        }

        self.capture.release(&self.stream);
        if let Some(screen) = self.screen.take() {
            self.capture.release_track(&screen);
        }
        if self.meter.reset() {
            self.emit(SessionEvent::Speaking {
                speaking: false,
                level: 0.0,
            });
        }

        self.peers.close_all().await;
        self.channel.leave().await;

        if let Err(e) = self.store.close_participant(&self.me.id, now_millis()).await {
            tracing::warn!(participant_id = %self.me.id, error = %e, "Failed to close participant record");
        }

        self.membership = MembershipState::Left;
        self.emit(SessionEvent::MembershipChanged {
            state: MembershipState::Left,
        });
    }

    fn require_instructor(&self) -> Result<()> {
        if self.me.role == Role::Instructor {
            Ok(())
        } else {
            Err(LiveError::Unauthorized(self.me.id.to_string()))
        }
    }

    fn sent_by_instructor(&self, from: &ParticipantId) -> bool {
        self.presence
            .presence(from)
            .map(|meta| meta.role == Role::Instructor)
            .unwrap_or(false)
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::StartStream { reply } => {
                let _ = reply.send(self.transition_room(RoomStatus::Live).await);
            }
            SessionCommand::EndStream { reply } => {
                let result = self.transition_room(RoomStatus::Ended).await;
                let ended = result.is_ok();
                let _ = reply.send(result);
                if ended {
                    return Flow::Stop(StopReason::RoomEnded);
                }
            }
            SessionCommand::SetRecording { enabled, reply } => {
                let _ = reply.send(self.set_recording(enabled).await);
            }
            SessionCommand::MuteAll { reply } => {
                let _ = reply.send(self.moderate(ModerationAction::MuteAll).await);
            }
            SessionCommand::LockRoom { locked, reply } => {
                let _ = reply.send(self.lock_room(locked).await);
            }
            SessionCommand::RemoveParticipant { participant_id, reply } => {
                let _ = reply.send(self.remove_participant(participant_id).await);
            }
            SessionCommand::SetAudio { enabled, reply } => {
                let _ = reply.send(self.set_enabled(TrackKind::Audio, enabled).await);
            }
            SessionCommand::SetVideo { enabled, reply } => {
                let _ = reply.send(self.set_enabled(TrackKind::Video, enabled).await);
            }
            SessionCommand::SwitchDevice { kind, device_id, reply } => {
                let _ = reply.send(self.switch_device(kind, &device_id).await);
            }
            SessionCommand::StartScreenShare { reply } => {
                let _ = reply.send(self.start_screen_share().await);
            }
            SessionCommand::StopScreenShare { reply } => {
                let _ = reply.send(self.stop_screen_share().await);
            }
            SessionCommand::SendChat { text, reply } => {
                let _ = reply.send(self.send_chat(text).await);
            }
            SessionCommand::SendReaction { emoji, reply } => {
                let _ = reply.send(self.send_reaction(emoji).await);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
        Flow::Continue
    }

    async fn transition_room(&mut self, next: RoomStatus) -> Result<()> {
        self.require_instructor()?;
        if !self.room.status.can_transition_to(next) {
            return Err(LiveError::InvalidTransition {
                from: self.room.status.to_string(),
                to: next.to_string(),
            });
        }

        let mut updated = self.room.clone();
        updated.status = next;
        match next {
            RoomStatus::Live => updated.started_at = Some(now_millis()),
            RoomStatus::Ended => updated.ended_at = Some(now_millis()),
            RoomStatus::Waiting => {}
        }
        self.store.update_room(&updated).await?;
        self.room = updated;
        tracing::info!(room_id = %self.room.id, status = %next, "Room status changed");

        if let Err(e) = self.channel.broadcast(SignalMessage::RoomStatus { status: next }).await {
            tracing::warn!(room_id = %self.room.id, error = %e, "Failed to broadcast room status");
        }
        self.emit(SessionEvent::RoomStatusChanged { status: next });
        Ok(())
    }

    async fn set_recording(&mut self, enabled: bool) -> Result<()> {
        self.require_instructor()?;
        let mut updated = self.room.clone();
        updated.settings.recording = enabled;
        self.store.update_room(&updated).await?;
        self.room = updated;

        self.channel
            .broadcast(SignalMessage::RoomSettings {
                settings: self.room.settings.clone(),
            })
            .await?;
        self.emit(SessionEvent::RoomSettingsChanged {
            settings: self.room.settings.clone(),
        });
        Ok(())
    }

    async fn lock_room(&mut self, locked: bool) -> Result<()> {
        self.require_instructor()?;
        let mut updated = self.room.clone();
        updated.settings.locked = locked;
        self.store.update_room(&updated).await?;
        self.room = updated;

        self.moderate(ModerationAction::Lock { locked }).await?;
        self.emit(SessionEvent::RoomSettingsChanged {
            settings: self.room.settings.clone(),
        });
        Ok(())
    }

    /// Advisory: receivers are trusted to comply.
    async fn moderate(&mut self, action: ModerationAction) -> Result<()> {
        self.require_instructor()?;
        tracing::info!(room_id = %self.room.id, action = ?action, "Moderation action");
        self.channel.broadcast(SignalMessage::Moderation { action }).await
    }

    async fn remove_participant(&mut self, participant_id: ParticipantId) -> Result<()> {
        self.require_instructor()?;
        if participant_id == self.me.id {
            return Err(LiveError::Unauthorized(participant_id.to_string()));
        }
        if !self
            .presence
            .roster()
            .iter()
            .any(|entry| entry.participant_id == participant_id)
        {
            return Err(LiveError::ParticipantNotFound(participant_id.to_string()));
        }

        self.moderate(ModerationAction::Remove {
            participant_id: participant_id.clone(),
        })
        .await?;

        self.peers.remove_participant(&participant_id).await;
        self.store.close_participant(&participant_id, now_millis()).await?;
        self.presence.apply(PresenceEvent::Leave(participant_id));
        self.emit_roster();
        Ok(())
    }

    fn current_media(&self) -> MediaFlags {
        MediaFlags {
            audio: self.stream.has_active(TrackKind::Audio),
            video: self.stream.has_active(TrackKind::Video),
            screen: self.screen.as_ref().map(|t| t.is_live()).unwrap_or(false),
        }
    }

    /// Brings the own record and the room's view in line with the local tracks.
    async fn publish_media_state(&mut self) {
        let media = self.current_media();
        if media == self.me.media() {
            return;
        }

        self.me.set_media(media);
        if let Err(e) = self.store.update_participant(&self.me).await {
            tracing::warn!(participant_id = %self.me.id, error = %e, "Failed to persist media state");
            self.notice(e.severity(), e.to_string());
        }
        if let Err(e) = self.channel.broadcast(SignalMessage::MediaState { media }).await {
            tracing::warn!(participant_id = %self.me.id, error = %e, "Failed to broadcast media state");
        }
        if self.presence.update_media(&self.me.id, media) {
            self.emit_roster();
        }
    }

    async fn set_enabled(&mut self, kind: TrackKind, enabled: bool) -> Result<()> {
        let live = self.stream.track(kind).filter(|t| t.is_live()).cloned();
        match (live, enabled) {
            (Some(track), _) => track.set_enabled(enabled),
            (None, true) => {
                let acquired = self.capture.acquire(&MediaConstraints::only(kind, None)).await;
                let stream = match acquired {
                    Ok(stream) => stream,
                    Err(error) => {
                        self.emit(SessionEvent::LocalMediaError {
                            source: camera_or_mic(kind),
                            error: error.clone(),
                        });
                        return Err(error.into());
                    }
                };
                if let Some(dead) = self.stream.take(kind) {
                    self.capture.release_track(&dead);
                }
                let track = stream.track(kind).cloned();
                self.stream.absorb(stream);
                if let Some(track) = track {
                    if !(kind == TrackKind::Video && self.screen.is_some()) {
                        self.peers.set_outgoing(kind, Some(track)).await;
                    }
                }
            }
            (None, false) => {}
        }

        if kind == TrackKind::Audio && !enabled && self.meter.reset() {
            self.emit(SessionEvent::Speaking {
                speaking: false,
                level: 0.0,
            });
        }
        tracing::info!(participant_id = %self.me.id, kind = %kind, enabled, "Local media toggled");
        self.publish_media_state().await;
        Ok(())
    }

    async fn switch_device(&mut self, kind: TrackKind, device_id: &str) -> Result<()> {
        let track = match self.capture.replace_track(&mut self.stream, kind, device_id).await {
            Ok(track) => track,
            Err(error) => {
                self.emit(SessionEvent::LocalMediaError {
                    source: camera_or_mic(kind),
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        if !(kind == TrackKind::Video && self.screen.is_some()) {
            self.peers.set_outgoing(kind, Some(track)).await;
        }
        self.publish_media_state().await;
        Ok(())
    }

    async fn start_screen_share(&mut self) -> Result<()> {
        if self.screen.is_some() {
            return Ok(());
        }

        let screen = match self.capture.acquire_display().await {
            Ok(track) => track,
            Err(error) => {
                self.emit(SessionEvent::LocalMediaError {
                    source: TrackSource::Screen,
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        tracing::info!(participant_id = %self.me.id, track_id = %screen.id(), "Screen share started");
        self.peers.set_outgoing(TrackKind::Video, Some(screen.clone())).await;
        self.screen = Some(screen);
        self.publish_media_state().await;
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<()> {
        let Some(screen) = self.screen.take() else {
            return Ok(());
        };

        self.capture.release_track(&screen);
        let camera = self
            .stream
            .track(TrackKind::Video)
            .filter(|t| t.is_live())
            .cloned();
        self.peers.set_outgoing(TrackKind::Video, camera).await;

        tracing::info!(participant_id = %self.me.id, "Screen share stopped");
        self.publish_media_state().await;
        Ok(())
    }

    async fn send_chat(&mut self, text: String) -> Result<ChatMessage> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(LiveError::InvalidSignalingMessage("empty chat message".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.channel
            .broadcast(SignalMessage::Chat {
                id: id.clone(),
                text: text.clone(),
            })
            .await?;

        let message = ChatMessage {
            id,
            sender_id: self.me.id.clone(),
            sender_name: self.me.display_name.clone(),
            text,
            sent_at: now_millis(),
        };
        self.emit(SessionEvent::ChatMessage(message.clone()));
        Ok(message)
    }

    async fn send_reaction(&mut self, emoji: String) -> Result<Reaction> {
        if emoji.trim().is_empty() {
            return Err(LiveError::InvalidSignalingMessage("empty reaction".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.channel
            .broadcast(SignalMessage::Reaction {
                id: id.clone(),
                emoji: emoji.clone(),
            })
            .await?;

        let reaction = Reaction {
            id,
            sender_id: self.me.id.clone(),
            sender_name: self.me.display_name.clone(),
            emoji,
            sent_at: now_millis(),
        };
        self.emit(SessionEvent::Reaction(reaction.clone()));
        Ok(reaction)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let mut links: Vec<LinkSummary> = self
            .peers
            .links()
            .map(|link| LinkSummary {
                participant_id: link.remote.participant_id.clone(),
                display_name: link.remote.display_name.clone(),
                state: link.state(),
                remote_tracks: [TrackKind::Audio, TrackKind::Video]
                    .iter()
                    .filter_map(|kind| link.remote_track(*kind).cloned())
                    .collect(),
            })
            .collect();
        links.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));

        SessionSnapshot {
            room: self.room.clone(),
            me: self.me.clone(),
            membership: self.membership,
            roster: self.presence.roster(),
            links,
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> Flow {
        let from = envelope.from.clone();
        if envelope.message.is_negotiation() {
            if self.presence.is_departed(&from) {
                tracing::debug!(participant_id = %from, "Dropping negotiation from departed participant");
                return Flow::Continue;
            }
            let sender = self.presence.presence(&from).cloned();
            if let Err(e) = self.peers.handle_signal(envelope, sender).await {
                tracing::warn!(participant_id = %from, error = %e, "Negotiation step failed");
            }
            return Flow::Continue;
        }

        match &envelope.message {
            SignalMessage::PresenceJoin { meta } => {
                if self.presence.apply(PresenceEvent::Join(meta.clone())) {
                    self.emit_roster();
                }
                if let Err(e) = self.peers.on_presence_join(meta.clone()).await {
                    tracing::warn!(participant_id = %meta.participant_id, error = %e, "Failed to open peer link");
                }
            }
            SignalMessage::PresenceLeave { participant_id } => {
                if self.presence.apply(PresenceEvent::Leave(participant_id.clone())) {
                    self.emit_roster();
                }
                self.peers.remove_participant(participant_id).await;
            }
            SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. }
            | SignalMessage::Renegotiate => {}
            SignalMessage::Chat { id, text } => {
                self.emit(SessionEvent::ChatMessage(ChatMessage {
                    id: id.clone(),
                    sender_id: from,
                    sender_name: envelope.from_name.clone(),
                    text: text.clone(),
                    sent_at: envelope.sent_at,
                }));
            }
            SignalMessage::Reaction { id, emoji } => {
                self.emit(SessionEvent::Reaction(Reaction {
                    id: id.clone(),
                    sender_id: from,
                    sender_name: envelope.from_name.clone(),
                    emoji: emoji.clone(),
                    sent_at: envelope.sent_at,
                }));
            }
            SignalMessage::RoomStatus { status } => {
                return self.on_room_status(&from, *status);
            }
            SignalMessage::RoomSettings { settings } => {
                if self.sent_by_instructor(&from) && self.room.settings != *settings {
                    self.room.settings = settings.clone();
                    self.emit(SessionEvent::RoomSettingsChanged {
                        settings: settings.clone(),
                    });
                }
            }
            SignalMessage::Moderation { action } => {
                return self.on_moderation(&from, action.clone()).await;
            }
            SignalMessage::MediaState { media } => {
                if self.presence.update_media(&from, *media) {
                    self.emit_roster();
                }
                self.emit(SessionEvent::RemoteMediaState {
                    participant_id: from,
                    media: *media,
                });
            }
        }
        Flow::Continue
    }

    fn on_room_status(&mut self, from: &ParticipantId, status: RoomStatus) -> Flow {
        if !self.sent_by_instructor(from) {
            tracing::warn!(participant_id = %from, "Ignoring room status from non-instructor");
            return Flow::Continue;
        }
        if status == self.room.status || !(status.is_terminal() || self.room.status.can_transition_to(status)) {
            return Flow::Continue;
        }

        self.room.status = status;
        tracing::info!(room_id = %self.room.id, status = %status, "Room status received");
        self.emit(SessionEvent::RoomStatusChanged { status });
        if status.is_terminal() {
            Flow::Stop(StopReason::RoomEnded)
        } else {
            Flow::Continue
        }
    }

    async fn on_moderation(&mut self, from: &ParticipantId, action: ModerationAction) -> Flow {
        if !self.sent_by_instructor(from) {
            tracing::warn!(participant_id = %from, action = ?action, "Ignoring moderation from non-instructor");
            return Flow::Continue;
        }

        self.emit(SessionEvent::Moderation {
            from: from.clone(),
            action: action.clone(),
        });

        match action {
            ModerationAction::MuteAll => {
                if self.me.role == Role::Attendee {
                    if let Err(e) = self.set_enabled(TrackKind::Audio, false).await {
                        tracing::warn!(error = %e, "Failed to honor mute-all");
                    }
                }
            }
            ModerationAction::Lock { locked } => {
                if self.room.settings.locked != locked {
                    self.room.settings.locked = locked;
                    self.emit(SessionEvent::RoomSettingsChanged {
                        settings: self.room.settings.clone(),
                    });
                }
            }
            ModerationAction::Remove { participant_id } => {
                if participant_id == self.me.id {
                    tracing::info!(participant_id = %self.me.id, "Removed by instructor");
                    self.notice(Severity::Reported, "You were removed from the room");
                    return Flow::Stop(StopReason::Removed);
                }
                if self.presence.apply(PresenceEvent::Leave(participant_id.clone())) {
                    self.emit_roster();
                }
                self.peers.remove_participant(&participant_id).await;
            }
        }
        Flow::Continue
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        let event = match event {
            PeerEvent::StateChanged { participant_id, state } => {
                SessionEvent::PeerStateChanged { participant_id, state }
            }
            PeerEvent::MediaLost { participant_id } => SessionEvent::ParticipantMediaLost { participant_id },
            PeerEvent::RemoteTrack { participant_id, track } => SessionEvent::RemoteTrack { participant_id, track },
        };
        self.emit(event);
    }

    async fn reconcile(&mut self) -> Flow {
        let mut changed = false;

        match self.store.get_room(&self.room.id).await {
            Ok(Some(room)) => {
                if room.status == RoomStatus::Ended && self.room.status != RoomStatus::Ended {
                    tracing::info!(room_id = %self.room.id, "Room ended while unobserved");
                    self.room = room;
                    self.emit(SessionEvent::RoomStatusChanged {
                        status: RoomStatus::Ended,
                    });
                    return Flow::Stop(StopReason::RoomEnded);
                }
                if room.settings != self.room.settings {
                    self.emit(SessionEvent::RoomSettingsChanged {
                        settings: room.settings.clone(),
                    });
                }
                if room.status != self.room.status && self.room.status.can_transition_to(room.status) {
                    self.emit(SessionEvent::RoomStatusChanged { status: room.status });
                }
                self.room = room;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(room_id = %self.room.id, error = %e, "Room refresh failed"),
        }

        match self.store.open_participants(&self.room.id).await {
            Ok(records) => changed |= self.presence.sync_records(records),
            Err(e) => tracing::warn!(room_id = %self.room.id, error = %e, "Participant refresh failed"),
        }

        let now = Instant::now();
        for stale in self.presence.reconcile(now) {
            changed = true;
            self.peers.remove_participant(&stale).await;
            if let Err(e) = self.store.close_participant(&stale, now_millis()).await {
                tracing::warn!(participant_id = %stale, error = %e, "Failed to close stale participant");
            }
        }

        self.peers.sweep(now).await;
        self.publish_media_state().await;

        if changed {
            self.emit_roster();
        }
        Flow::Continue
    }

    fn sample_meter(&mut self) {
        let Some(track) = self.stream.track(TrackKind::Audio) else {
            return;
        };
        if !track.is_enabled() {
            return;
        }
        let Some(bins) = self.capture.audio_spectrum(track) else {
            return;
        };

        let reading = self.meter.sample(&bins);
        if reading.changed {
            self.emit(SessionEvent::Speaking {
                speaking: reading.speaking,
                level: reading.level,
            });
        }
    }
}

fn camera_or_mic(kind: TrackKind) -> TrackSource {
    match kind {
        TrackKind::Audio => TrackSource::Microphone,
        TrackKind::Video => TrackSource::Camera,
    }
}
