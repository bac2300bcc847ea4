use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::*;
use crate::config::SessionConfig;
use crate::error::{LiveError, Result, Severity};
use crate::media::{MediaConstraints, TrackSource, VirtualDevices};
use crate::model::{LocalUser, ParticipantId, ParticipantRecord, Role, RoomId, RoomRecord, RoomStatus};
use crate::peer::loopback::LoopbackNetwork;
use crate::peer::LinkState;
use crate::signaling::{
    room_topic, Envelope, MemoryHub, ModerationAction, PresenceMeta, RealtimeTransport, SignalMessage,
};
use crate::store::{MemoryStore, RecordStore};

const LESSON: &str = "lesson-42";

fn test_config() -> SessionConfig {
    SessionConfig {
        reconcile_interval: Duration::from_millis(40),
        presence_grace: Duration::from_millis(150),
        link_grace: Duration::from_millis(150),
        leave_timeout: Duration::from_millis(100),
        meter_interval: None,
    }
}

fn instructor() -> LocalUser {
    LocalUser {
        user_id: "instructor-1".to_string(),
        display_name: "Ada".to_string(),
        role: Role::Instructor,
    }
}

fn attendee(user_id: &str) -> LocalUser {
    LocalUser {
        user_id: user_id.to_string(),
        display_name: user_id.to_uppercase(),
        role: Role::Attendee,
    }
}

fn both() -> MediaConstraints {
    MediaConstraints::new(true, true)
}

struct World {
    hub: Arc<MemoryHub>,
    store: Arc<MemoryStore>,
    network: Arc<LoopbackNetwork>,
}

struct Party {
    controller: RoomSessionController,
    devices: Arc<VirtualDevices>,
    events: broadcast::Receiver<SessionEvent>,
}

impl World {
    fn new() -> Self {
        Self {
            hub: MemoryHub::new(),
            store: MemoryStore::new(),
            network: LoopbackNetwork::new(),
        }
    }

    fn party(&self) -> Party {
        self.party_with(test_config(), self.store.clone())
    }

    fn party_with(&self, config: SessionConfig, store: Arc<dyn RecordStore>) -> Party {
        let devices = Arc::new(VirtualDevices::new());
        let controller = RoomSessionController::new(SessionDeps {
            store,
            realtime: self.hub.clone(),
            devices: devices.clone(),
            peers: self.network.clone(),
            config,
        });
        let events = controller.subscribe();
        Party {
            controller,
            devices,
            events,
        }
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

fn is_connected(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::PeerStateChanged {
            state: LinkState::Connected,
            ..
        }
    )
}

fn is_left(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::MembershipChanged {
            state: MembershipState::Left
        }
    )
}

/// Instructor live in the room and one attendee joined, peer link connected.
async fn live_room(world: &World) -> (Party, SessionHandle, Party, SessionHandle) {
    let mut host = world.party();
    let host_handle = host.controller.join(LESSON, instructor(), both()).await.unwrap();
    host_handle.start_stream().await.unwrap();

    let mut student = world.party();
    let student_handle = student.controller.join(LESSON, attendee("bob"), both()).await.unwrap();

    wait_for(&mut host.events, is_connected).await;
    wait_for(&mut student.events, is_connected).await;

    (host, host_handle, student, student_handle)
}

#[tokio::test]
async fn test_instructor_opens_waiting_room_then_goes_live() {
    let world = World::new();
    let host = world.party();

    let handle = host.controller.join(LESSON, instructor(), both()).await.unwrap();
    let room = world.store.get_room(handle.room_id()).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Waiting);
    assert_eq!(room.lesson_id, LESSON);

    handle.start_stream().await.unwrap();
    let room = world.store.get_room(handle.room_id()).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Live);
    assert!(room.started_at.is_some());

    handle.leave().await;
}

#[tokio::test]
async fn test_instructor_rejoin_reuses_open_room() {
    let world = World::new();
    let first = world.party().controller.join(LESSON, instructor(), both()).await.unwrap();
    let room_id = first.room_id().clone();
    first.leave().await;

    let second = world.party().controller.join(LESSON, instructor(), both()).await.unwrap();
    assert_eq!(second.room_id(), &room_id);
    assert_ne!(second.participant_id(), first.participant_id());

    let history = world.store.participant_history(&room_id).await;
    assert_eq!(history.len(), 2);
    second.leave().await;
}

#[tokio::test]
async fn test_attendee_cannot_change_room_status() {
    let world = World::new();
    let host = world.party().controller.join(LESSON, instructor(), both()).await.unwrap();
    let student = world.party().controller.join(LESSON, attendee("bob"), both()).await.unwrap();

    let result = student.start_stream().await;
    assert!(matches!(result, Err(LiveError::Unauthorized(_))));
    assert!(matches!(student.end_stream().await, Err(LiveError::Unauthorized(_))));
    assert!(matches!(student.mute_all().await, Err(LiveError::Unauthorized(_))));

    let room = world.store.get_room(host.room_id()).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Waiting);

    student.leave().await;
    host.leave().await;
}

#[tokio::test]
async fn test_ending_a_waiting_room_is_rejected() {
    let world = World::new();
    let handle = world.party().controller.join(LESSON, instructor(), both()).await.unwrap();

    let result = handle.end_stream().await;
    assert!(matches!(result, Err(LiveError::InvalidTransition { .. })));
    assert!(handle.is_active());

    handle.start_stream().await.unwrap();
    assert!(matches!(
        handle.start_stream().await,
        Err(LiveError::InvalidTransition { .. })
    ));
    handle.leave().await;
}

#[tokio::test]
async fn test_attendee_without_room_is_rejected() {
    let world = World::new();
    let party = world.party();

    let result = party.controller.join(LESSON, attendee("bob"), both()).await;
    assert!(matches!(result, Err(LiveError::RoomNotFound(_))));
    assert_eq!(party.devices.opened_tracks(), 0);
}

#[tokio::test]
async fn test_attendee_cannot_join_ended_or_locked_room() {
    let world = World::new();
    let mut ended = RoomRecord::waiting(LESSON);
    ended.status = RoomStatus::Ended;
    world.store.insert_room(&ended).await.unwrap();

    let result = world.party().controller.join(LESSON, attendee("bob"), both()).await;
    let err = result.err().unwrap();
    assert!(matches!(err, LiveError::RoomEnded(_)));
    assert!(err.is_fatal());

    let locked_world = World::new();
    let host = locked_world.party().controller.join(LESSON, instructor(), both()).await.unwrap();
    host.lock_room(true).await.unwrap();

    let result = locked_world.party().controller.join(LESSON, attendee("bob"), both()).await;
    let err = result.err().unwrap();
    assert!(matches!(err, LiveError::RoomLocked(_)));
    assert_eq!(err.severity(), Severity::Reported);
    host.leave().await;
}

#[tokio::test]
async fn test_camera_denial_still_joins_with_audio() {
    let world = World::new();
    let mut party = world.party();
    party.devices.deny(TrackSource::Camera);

    let handle = party.controller.join(LESSON, instructor(), both()).await.unwrap();

    let event = wait_for(&mut party.events, |e| matches!(e, SessionEvent::LocalMediaError { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::LocalMediaError {
            source: TrackSource::Camera,
            ..
        }
    ));

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.me.audio_enabled);
    assert!(!snapshot.me.video_enabled);
    let stored = world.store.get_participant(handle.participant_id()).await.unwrap();
    assert!(stored.audio_enabled);
    assert!(!stored.video_enabled);

    assert!(matches!(handle.set_video(true).await, Err(LiveError::Media(_))));
    handle.leave().await;
}

#[tokio::test]
async fn test_camera_and_microphone_denied_still_joins() {
    let world = World::new();
    let mut party = world.party();
    party.devices.deny(TrackSource::Camera);
    party.devices.deny(TrackSource::Microphone);

    let handle = party.controller.join(LESSON, instructor(), both()).await.unwrap();

    wait_for(&mut party.events, |e| {
        matches!(
            e,
            SessionEvent::LocalMediaError {
                source: TrackSource::Microphone,
                ..
            }
        )
    })
    .await;
    wait_for(&mut party.events, |e| {
        matches!(
            e,
            SessionEvent::LocalMediaError {
                source: TrackSource::Camera,
                ..
            }
        )
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.me.audio_enabled);
    assert!(!snapshot.me.video_enabled);
    let stored = world.store.get_participant(handle.participant_id()).await.unwrap();
    assert!(!stored.audio_enabled);
    assert!(!stored.video_enabled);
    assert!(stored.left_at.is_none());
    assert_eq!(party.devices.live_tracks(), 0);

    assert!(matches!(handle.set_audio(true).await, Err(LiveError::Media(_))));
    handle.leave().await;
}

#[tokio::test]
async fn test_leave_is_idempotent_and_releases_everything() {
    let world = World::new();
    let party = world.party();
    let handle = party.controller.join(LESSON, instructor(), both()).await.unwrap();
    assert_eq!(party.devices.live_tracks(), 2);

    handle.leave().await;
    handle.leave().await;

    assert!(!handle.is_active());
    assert_eq!(party.devices.live_tracks(), 0);
    assert_eq!(party.devices.stopped_tracks(), 2);

    let record = world.store.get_participant(handle.participant_id()).await.unwrap();
    assert!(record.left_at.is_some());
    assert!(world.hub.members(&room_topic(handle.room_id())).await.is_empty());
    assert!(matches!(handle.snapshot().await, Err(LiveError::NotJoined)));
}

#[tokio::test]
async fn test_dropping_handle_tears_down() {
    let world = World::new();
    let mut party = world.party();
    let handle = party.controller.join(LESSON, instructor(), both()).await.unwrap();
    let participant_id = handle.participant_id().clone();

    drop(handle);
    wait_for(&mut party.events, is_left).await;

    assert_eq!(party.devices.live_tracks(), 0);
    let record = world.store.get_participant(&participant_id).await.unwrap();
    assert!(record.left_at.is_some());
}

/// Delegates to a `MemoryStore` but refuses participant inserts.
struct RejectingStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl RecordStore for RejectingStore {
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        self.inner.get_room(room_id).await
    }

    async fn latest_room_for_lesson(&self, lesson_id: &str) -> Result<Option<RoomRecord>> {
        self.inner.latest_room_for_lesson(lesson_id).await
    }

    async fn insert_room(&self, room: &RoomRecord) -> Result<RoomRecord> {
        self.inner.insert_room(room).await
    }

    async fn update_room(&self, room: &RoomRecord) -> Result<()> {
        self.inner.update_room(room).await
    }

    async fn insert_participant(&self, _participant: &ParticipantRecord) -> Result<ParticipantRecord> {
        Err(LiveError::store("insert rejected"))
    }

    async fn update_participant(&self, participant: &ParticipantRecord) -> Result<()> {
        self.inner.update_participant(participant).await
    }

    async fn close_participant(&self, participant_id: &ParticipantId, left_at: u64) -> Result<()> {
        self.inner.close_participant(participant_id, left_at).await
    }

    async fn open_participants(&self, room_id: &RoomId) -> Result<Vec<ParticipantRecord>> {
        self.inner.open_participants(room_id).await
    }
}

#[tokio::test]
async fn test_record_failure_is_reported_and_releases_media() {
    let world = World::new();
    let store = Arc::new(RejectingStore {
        inner: world.store.clone(),
    });
    let party = world.party_with(test_config(), store);

    let err = party
        .controller
        .join(LESSON, instructor(), both())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, LiveError::Store(_)));
    assert_eq!(err.severity(), Severity::Reported);
    assert_eq!(party.devices.opened_tracks(), 2);
    assert_eq!(party.devices.live_tracks(), 0);
}

struct UnreachableRealtime;

#[async_trait]
impl RealtimeTransport for UnreachableRealtime {
    async fn subscribe(&self, _topic: &str, _meta: PresenceMeta) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        Err(LiveError::NetworkError("realtime service unreachable".to_string()))
    }

    async fn publish(&self, _topic: &str, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _topic: &str, _participant_id: &ParticipantId) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_channel_failure_is_fatal_and_closes_record() {
    let store = MemoryStore::new();
    let devices = Arc::new(VirtualDevices::new());
    let controller = RoomSessionController::new(SessionDeps {
        store: store.clone(),
        realtime: Arc::new(UnreachableRealtime),
        devices: devices.clone(),
        peers: LoopbackNetwork::new(),
        config: test_config(),
    });

    let err = controller.join(LESSON, instructor(), both()).await.err().unwrap();
    assert!(matches!(err, LiveError::ChannelUnavailable(_)));
    assert!(err.is_fatal());
    assert_eq!(devices.live_tracks(), 0);

    let room = store.latest_room_for_lesson(LESSON).await.unwrap().unwrap();
    let history = store.participant_history(&room.id).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].left_at.is_some());
}

/// Accepts the subscription request but never answers it.
struct HangingRealtime;

#[async_trait]
impl RealtimeTransport for HangingRealtime {
    async fn subscribe(&self, _topic: &str, _meta: PresenceMeta) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        std::future::pending::<Result<mpsc::UnboundedReceiver<Envelope>>>().await
    }

    async fn publish(&self, _topic: &str, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _topic: &str, _participant_id: &ParticipantId) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_abandoned_join_releases_media_and_record() {
    let store = MemoryStore::new();
    let devices = Arc::new(VirtualDevices::new());
    let controller = RoomSessionController::new(SessionDeps {
        store: store.clone(),
        realtime: Arc::new(HangingRealtime),
        devices: devices.clone(),
        peers: LoopbackNetwork::new(),
        config: test_config(),
    });

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        controller.join(LESSON, instructor(), both()),
    )
    .await;
    assert!(result.is_err());
    assert_eq!(devices.opened_tracks(), 2);
    assert_eq!(devices.live_tracks(), 0);

    let room = store.latest_room_for_lesson(LESSON).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.open_participants(&room.id).await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("participant record left open after abandoned join");

    let history = store.participant_history(&room.id).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].left_at.is_some());
}

#[tokio::test]
async fn test_two_participants_connect() {
    let world = World::new();
    let (_host, host_handle, _student, student_handle) = live_room(&world).await;

    let host_view = host_handle.snapshot().await.unwrap();
    let student_view = student_handle.snapshot().await.unwrap();

    assert_eq!(host_view.links.len(), 1);
    assert_eq!(host_view.links[0].participant_id, *student_handle.participant_id());
    assert_eq!(host_view.links[0].state, LinkState::Connected);
    assert_eq!(student_view.links[0].participant_id, *host_handle.participant_id());
    assert_eq!(student_view.links[0].state, LinkState::Connected);

    assert_eq!(host_view.roster.len(), 2);
    assert_eq!(student_view.roster.len(), 2);
    assert_eq!(world.network.created(), 2);

    student_handle.leave().await;
    host_handle.leave().await;
}

#[tokio::test]
async fn test_departed_attendee_drops_from_roster_and_links() {
    let world = World::new();
    let (_host, host_handle, _student, student_handle) = live_room(&world).await;
    let student_id = student_handle.participant_id().clone();

    student_handle.leave().await;
    tokio::time::sleep(test_config().reconcile_interval).await;

    let host_view = host_handle.snapshot().await.unwrap();
    assert!(host_view.links.is_empty());
    assert_eq!(host_view.roster.len(), 1);
    assert_eq!(host_view.roster[0].participant_id, *host_handle.participant_id());
    assert!(host_view.roster.iter().all(|p| p.participant_id != student_id));

    host_handle.leave().await;
}

#[tokio::test]
async fn test_screen_share_swaps_track_on_existing_link() {
    let world = World::new();
    let (_host, host_handle, mut student, student_handle) = live_room(&world).await;
    let host_id = host_handle.participant_id().clone();

    host_handle.start_screen_share().await.unwrap();
    let event = wait_for(&mut student.events, |e| {
        matches!(e, SessionEvent::RemoteTrack { track, .. } if track.track_id.starts_with("screen-"))
    })
    .await;
    assert!(matches!(event, SessionEvent::RemoteTrack { participant_id, .. } if participant_id == host_id));

    let stored = world.store.get_participant(&host_id).await.unwrap();
    assert!(stored.screen_sharing);
    assert_eq!(world.network.created(), 2);

    host_handle.stop_screen_share().await.unwrap();
    wait_for(&mut student.events, |e| {
        matches!(e, SessionEvent::RemoteTrack { track, .. } if track.track_id.starts_with("cam-"))
    })
    .await;

    let student_view = student_handle.snapshot().await.unwrap();
    assert_eq!(student_view.links[0].state, LinkState::Connected);
    assert!(!world.store.get_participant(&host_id).await.unwrap().screen_sharing);
    assert_eq!(world.network.created(), 2);

    student_handle.leave().await;
    host_handle.leave().await;
}

#[tokio::test]
async fn test_ending_the_room_tears_down_attendees() {
    let world = World::new();
    let (_host, host_handle, mut student, student_handle) = live_room(&world).await;

    host_handle.end_stream().await.unwrap();

    wait_for(&mut student.events, |e| {
        matches!(
            e,
            SessionEvent::RoomStatusChanged {
                status: RoomStatus::Ended
            }
        )
    })
    .await;
    wait_for(&mut student.events, is_left).await;
    student_handle.closed().await;
    host_handle.closed().await;

    let room = world.store.get_room(host_handle.room_id()).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Ended);
    assert!(room.ended_at.is_some());
    assert!(world.store.open_participants(&room.id).await.unwrap().is_empty());
    assert_eq!(student.devices.live_tracks(), 0);
}

#[tokio::test]
async fn test_stale_record_is_force_closed() {
    let world = World::new();
    let mut party = world.party();
    let handle = party.controller.join(LESSON, instructor(), both()).await.unwrap();

    let ghost = ParticipantRecord {
        id: ParticipantId::from("ghost"),
        room_id: handle.room_id().clone(),
        user_id: "ghost-user".to_string(),
        display_name: "Ghost".to_string(),
        role: Role::Attendee,
        audio_enabled: true,
        video_enabled: false,
        screen_sharing: false,
        joined_at: 1,
        left_at: None,
    };
    world.store.insert_participant(&ghost).await.unwrap();

    wait_for(&mut party.events, |e| {
        matches!(e, SessionEvent::ParticipantListChanged { participants }
            if participants.iter().any(|p| p.participant_id == ghost.id))
    })
    .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = world.store.get_participant(&ghost.id).await.unwrap();
            if record.left_at.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stale record was never closed");

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.roster.iter().all(|p| p.participant_id != ghost.id));
    assert!(world
        .store
        .get_participant(handle.participant_id())
        .await
        .unwrap()
        .left_at
        .is_none());
    handle.leave().await;
}

#[tokio::test]
async fn test_mute_all_is_honored_by_attendee() {
    let world = World::new();
    let (_host, host_handle, mut student, student_handle) = live_room(&world).await;

    host_handle.mute_all().await.unwrap();
    wait_for(&mut student.events, |e| {
        matches!(
            e,
            SessionEvent::Moderation {
                action: ModerationAction::MuteAll,
                ..
            }
        )
    })
    .await;

    let student_view = student_handle.snapshot().await.unwrap();
    assert!(!student_view.me.audio_enabled);
    assert!(student_view.me.video_enabled);
    let host_view = host_handle.snapshot().await.unwrap();
    assert!(host_view.me.audio_enabled);

    student_handle.leave().await;
    host_handle.leave().await;
}

#[tokio::test]
async fn test_removed_participant_leaves_itself() {
    let world = World::new();
    let (_host, host_handle, mut student, student_handle) = live_room(&world).await;
    let student_id = student_handle.participant_id().clone();

    host_handle.remove_participant(&student_id).await.unwrap();
    wait_for(&mut student.events, is_left).await;

    let record = world.store.get_participant(&student_id).await.unwrap();
    assert!(record.left_at.is_some());
    let host_view = host_handle.snapshot().await.unwrap();
    assert!(host_view.links.is_empty());
    assert!(host_view.roster.iter().all(|p| p.participant_id != student_id));

    host_handle.leave().await;
}

fn outsider(id: &str) -> PresenceMeta {
    PresenceMeta {
        participant_id: ParticipantId::from(id),
        user_id: format!("outsider-{}", id),
        display_name: id.to_uppercase(),
        role: Role::Attendee,
        joined_at: 0,
        media: Default::default(),
    }
}

/// Sends an offer to `target` followed by a chat line, and waits for the chat
/// so the offer is known to have been handled.
async fn offer_then_chat(world: &World, party: &mut Party, topic: &str, target: &ParticipantId, from: &PresenceMeta) {
    let offer = Envelope::new(from, Some(target.clone()), SignalMessage::Offer { sdp: "late".to_string() });
    world.hub.publish(topic, offer).await.unwrap();
    let chat = Envelope::new(
        from,
        None,
        SignalMessage::Chat {
            id: format!("marker-{}", from.participant_id),
            text: "marker".to_string(),
        },
    );
    world.hub.publish(topic, chat).await.unwrap();

    let sender = from.participant_id.clone();
    wait_for(&mut party.events, |e| matches!(e, SessionEvent::ChatMessage(m) if m.sender_id == sender)).await;
}

#[tokio::test]
async fn test_negotiation_from_departed_or_unknown_sender_opens_no_link() {
    let world = World::new();
    let (mut host, host_handle, _student, student_handle) = live_room(&world).await;
    let host_id = host_handle.participant_id().clone();
    let topic = room_topic(host_handle.room_id());

    // Lowest possible ids, so the host would be the answering side
    let departed = outsider("0");
    let _departed_in = world.hub.subscribe(&topic, departed.clone()).await.unwrap();
    wait_for(&mut host.events, |e| {
        matches!(e, SessionEvent::ParticipantListChanged { participants } if participants.len() == 3)
    })
    .await;
    world.hub.unsubscribe(&topic, &departed.participant_id).await.unwrap();
    wait_for(&mut host.events, |e| {
        matches!(e, SessionEvent::ParticipantListChanged { participants } if participants.len() == 2)
    })
    .await;

    offer_then_chat(&world, &mut host, &topic, &host_id, &departed).await;
    offer_then_chat(&world, &mut host, &topic, &host_id, &outsider("00")).await;

    let host_view = host_handle.snapshot().await.unwrap();
    assert_eq!(host_view.links.len(), 1);
    assert_eq!(host_view.links[0].participant_id, *student_handle.participant_id());
    assert_eq!(host_view.roster.len(), 2);
    assert_eq!(world.network.created(), 2);

    student_handle.leave().await;
    host_handle.leave().await;
}

#[tokio::test]
async fn test_chat_is_delivered_to_the_room() {
    let world = World::new();
    let (mut host, host_handle, mut student, student_handle) = live_room(&world).await;

    let sent = student_handle.send_chat("  can you share the slides?  ").await.unwrap();
    assert_eq!(sent.text, "can you share the slides?");

    let received = wait_for(&mut host.events, |e| matches!(e, SessionEvent::ChatMessage(_))).await;
    match received {
        SessionEvent::ChatMessage(message) => {
            assert_eq!(message.id, sent.id);
            assert_eq!(message.sender_name, "BOB");
        }
        other => panic!("unexpected event {:?}", other),
    }

    host_handle.send_reaction("👍").await.unwrap();
    wait_for(&mut student.events, |e| matches!(e, SessionEvent::Reaction(r) if r.emoji == "👍")).await;

    assert!(matches!(
        student_handle.send_chat("   ").await,
        Err(LiveError::InvalidSignalingMessage(_))
    ));

    student_handle.leave().await;
    host_handle.leave().await;
}

#[tokio::test]
async fn test_speaking_indicator_follows_audio_level() {
    let world = World::new();
    let config = SessionConfig {
        meter_interval: Some(Duration::from_millis(10)),
        ..test_config()
    };
    let mut party = world.party_with(config, world.store.clone());
    party.devices.set_spectrum(vec![220; 64]);

    let handle = party.controller.join(LESSON, instructor(), both()).await.unwrap();
    wait_for(&mut party.events, |e| matches!(e, SessionEvent::Speaking { speaking: true, .. })).await;

    handle.set_audio(false).await.unwrap();
    wait_for(&mut party.events, |e| matches!(e, SessionEvent::Speaking { speaking: false, .. })).await;
    handle.leave().await;
}
