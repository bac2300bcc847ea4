use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::command::{SessionCommand, SessionRequest};
use super::events::{MembershipState, SessionEvent, SessionSnapshot};
use super::session::{RoomSession, SessionParts};
use crate::config::SessionConfig;
use crate::error::{LiveError, Result};
use crate::media::{LocalStream, MediaCapture, MediaConstraints, MediaDevices, TrackKind, TrackSource};
use crate::model::{now_millis, LocalUser, ParticipantId, ParticipantRecord, Role, RoomId, RoomRecord, RoomStatus};
use crate::peer::PeerTransportFactory;
use crate::signaling::{ChatMessage, PresenceMeta, RealtimeTransport, Reaction, SignalingChannel};
use crate::store::RecordStore;

const EVENT_CAPACITY: usize = 256;

/// External collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn RecordStore>,
    pub realtime: Arc<dyn RealtimeTransport>,
    pub devices: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerTransportFactory>,
    pub config: SessionConfig,
}

/// Entry point for joining a lesson's live room.
pub struct RoomSessionController {
    deps: SessionDeps,
    events: broadcast::Sender<SessionEvent>,
}

impl RoomSessionController {
    pub fn new(deps: SessionDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { deps, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Joins the live room of `lesson_id`.
    ///
    /// Steps run in order and each failure unwinds what the earlier steps did:
    /// room lookup, media capture (denial is tolerated), own participant
    /// record, signaling channel, then the session actor.
    pub async fn join(&self, lesson_id: &str, user: LocalUser, media: MediaConstraints) -> Result<SessionHandle> {
        self.emit(SessionEvent::MembershipChanged {
            state: MembershipState::Joining,
        });

        match self.try_join(lesson_id, user, media).await {
            Ok(handle) => {
                self.emit(SessionEvent::MembershipChanged {
                    state: MembershipState::Joined,
                });
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(lesson_id = %lesson_id, error = %e, "Join failed");
                self.emit(SessionEvent::Notice {
                    severity: e.severity(),
                    message: e.to_string(),
                });
                self.emit(SessionEvent::MembershipChanged {
                    state: MembershipState::NotJoined,
                });
                Err(e)
            }
        }
    }

    async fn try_join(&self, lesson_id: &str, user: LocalUser, media: MediaConstraints) -> Result<SessionHandle> {
        let room = self.resolve_room(lesson_id, user.role).await?;
        tracing::info!(room_id = %room.id, lesson_id = %lesson_id, status = %room.status, "Room resolved");

        let mut guard = JoinGuard::new(MediaCapture::new(self.deps.devices.clone()), self.deps.store.clone());
        self.acquire_media(&mut guard, &media).await;

        let record = ParticipantRecord {
            id: ParticipantId::new(),
            room_id: room.id.clone(),
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            audio_enabled: guard.stream.has_active(TrackKind::Audio),
            video_enabled: guard.stream.has_active(TrackKind::Video),
            screen_sharing: false,
            joined_at: now_millis(),
            left_at: None,
        };

        let record = self.deps.store.insert_participant(&record).await?;
        guard.record = Some(record.id.clone());

        let meta = PresenceMeta {
            participant_id: record.id.clone(),
            user_id: record.user_id.clone(),
            display_name: record.display_name.clone(),
            role: record.role,
            joined_at: record.joined_at,
            media: record.media(),
        };

        let (channel, inbound) = match SignalingChannel::join(
            self.deps.realtime.clone(),
            &room.id,
            meta,
            self.deps.config.leave_timeout,
        )
        .await
        {
            Ok(joined) => joined,
            Err(e) => {
                guard.unwind().await;
                return Err(e);
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            room_id: room.id.clone(),
            participant_id: record.id.clone(),
            role: record.role,
            commands: command_tx,
            events: self.events.clone(),
        };

        let (capture, stream) = guard.disarm();
        let session = RoomSession::new(SessionParts {
            room,
            me: record,
            store: self.deps.store.clone(),
            capture,
            stream,
            channel,
            inbound,
            commands: command_rx,
            peers: self.deps.peers.clone(),
            events: self.events.clone(),
            config: self.deps.config.clone(),
        });
        tokio::spawn(session.run());

        Ok(handle)
    }

    async fn resolve_room(&self, lesson_id: &str, role: Role) -> Result<RoomRecord> {
        let latest = self.deps.store.latest_room_for_lesson(lesson_id).await?;

        match role {
            Role::Instructor => match latest {
                Some(room) if room.status != RoomStatus::Ended => Ok(room),
                _ => {
                    let room = self.deps.store.insert_room(&RoomRecord::waiting(lesson_id)).await?;
                    tracing::info!(room_id = %room.id, lesson_id = %lesson_id, "Created waiting room");
                    Ok(room)
                }
            },
            Role::Attendee => {
                let room = latest.ok_or_else(|| LiveError::RoomNotFound(lesson_id.to_string()))?;
                if room.status == RoomStatus::Ended {
                    return Err(LiveError::RoomEnded(room.id.to_string()));
                }
                if room.settings.locked {
                    return Err(LiveError::RoomLocked(room.id.to_string()));
                }
                Ok(room)
            }
        }
    }

    /// Audio and video are requested separately so a denied camera still
    /// leaves the microphone usable.
    async fn acquire_media(&self, guard: &mut JoinGuard, media: &MediaConstraints) {
        let wanted = [
            (TrackKind::Audio, media.audio, media.audio_device_id.clone(), TrackSource::Microphone),
            (TrackKind::Video, media.video, media.video_device_id.clone(), TrackSource::Camera),
        ];

        for (kind, requested, device_id, source) in wanted {
            if !requested {
                continue;
            }
            match guard.capture.acquire(&MediaConstraints::only(kind, device_id)).await {
                Ok(acquired) => guard.stream.absorb(acquired),
                Err(error) => {
                    tracing::warn!(kind = %kind, error = %error, "Local media unavailable, joining without it");
                    self.emit(SessionEvent::LocalMediaError { source, error });
                }
            }
        }
    }
}

/// Owns what a join has acquired until the session actor takes over.
///
/// Dropped while still armed (a failed step or a cancelled `join` future), it
/// stops the local tracks and closes the participant record in the background.
struct JoinGuard {
    capture: MediaCapture,
    stream: LocalStream,
    store: Arc<dyn RecordStore>,
    record: Option<ParticipantId>,
    armed: bool,
}

impl JoinGuard {
    fn new(capture: MediaCapture, store: Arc<dyn RecordStore>) -> Self {
        Self {
            capture,
            stream: LocalStream::empty(),
            store,
            record: None,
            armed: true,
        }
    }

    /// Closes the record before returning, so the caller sees it closed.
    async fn unwind(mut self) {
        if let Some(id) = self.record.clone() {
            if let Err(e) = self.store.close_participant(&id, now_millis()).await {
                tracing::warn!(participant_id = %id, error = %e, "Failed to close participant record");
            }
            self.record = None;
        }
    }

    fn disarm(mut self) -> (MediaCapture, LocalStream) {
        self.armed = false;
        (self.capture.clone(), std::mem::take(&mut self.stream))
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.capture.release(&self.stream);

        let Some(id) = self.record.take() else {
            return;
        };
        tracing::info!(participant_id = %id, "Join abandoned, closing participant record");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                runtime.spawn(async move {
                    if let Err(e) = store.close_participant(&id, now_millis()).await {
                        tracing::warn!(participant_id = %id, error = %e, "Failed to close participant record");
                    }
                });
            }
            Err(_) => tracing::warn!(participant_id = %id, "No runtime left to close participant record"),
        }
    }
}

/// Handle to a running session. Dropping it ends the session.
pub struct SessionHandle {
    room_id: RoomId,
    participant_id: ParticipantId,
    role: Role,
    commands: mpsc::UnboundedSender<SessionRequest>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Resolves once the session has finished tearing down.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionRequest::Command(build(reply)))
            .map_err(|_| LiveError::NotJoined)?;
        response.await.map_err(|_| LiveError::NotJoined)?
    }

    pub async fn start_stream(&self) -> Result<()> {
        self.request(|reply| SessionCommand::StartStream { reply }).await
    }

    pub async fn end_stream(&self) -> Result<()> {
        self.request(|reply| SessionCommand::EndStream { reply }).await
    }

    pub async fn set_recording(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetRecording { enabled, reply }).await
    }

    pub async fn mute_all(&self) -> Result<()> {
        self.request(|reply| SessionCommand::MuteAll { reply }).await
    }

    pub async fn lock_room(&self, locked: bool) -> Result<()> {
        self.request(|reply| SessionCommand::LockRoom { locked, reply }).await
    }

    pub async fn remove_participant(&self, participant_id: &ParticipantId) -> Result<()> {
        let participant_id = participant_id.clone();
        self.request(|reply| SessionCommand::RemoveParticipant { participant_id, reply })
            .await
    }

    pub async fn set_audio(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetAudio { enabled, reply }).await
    }

    pub async fn set_video(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetVideo { enabled, reply }).await
    }

    pub async fn switch_device(&self, kind: TrackKind, device_id: &str) -> Result<()> {
        let device_id = device_id.to_string();
        self.request(|reply| SessionCommand::SwitchDevice { kind, device_id, reply })
            .await
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        self.request(|reply| SessionCommand::StartScreenShare { reply }).await
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        self.request(|reply| SessionCommand::StopScreenShare { reply }).await
    }

    pub async fn send_chat(&self, text: &str) -> Result<ChatMessage> {
        let text = text.to_string();
        self.request(|reply| SessionCommand::SendChat { text, reply }).await
    }

    pub async fn send_reaction(&self, emoji: &str) -> Result<Reaction> {
        let emoji = emoji.to_string();
        self.request(|reply| SessionCommand::SendReaction { emoji, reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionRequest::Command(SessionCommand::Snapshot { reply }))
            .map_err(|_| LiveError::NotJoined)?;
        response.await.map_err(|_| LiveError::NotJoined)
    }

    /// Leaves the room and waits for teardown. Safe to call more than once.
    pub async fn leave(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(SessionRequest::Leave(reply)).is_ok() {
            let _ = done.await;
        }
        self.commands.closed().await;
    }
}
