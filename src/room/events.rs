use serde::Serialize;

use crate::error::Severity;
use crate::media::{MediaError, TrackSource};
use crate::model::{MediaFlags, ParticipantId, ParticipantRecord, RoomRecord, RoomSettings, RoomStatus};
use crate::peer::{LinkState, RemoteTrackInfo};
use crate::presence::RosterEntry;
use crate::signaling::{ChatMessage, ModerationAction, Reaction};

/// Local membership in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipState {
    NotJoined,
    Joining,
    Joined,
    Left,
}

/// Everything the UI layer is told about a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MembershipChanged {
        state: MembershipState,
    },
    ParticipantListChanged {
        participants: Vec<RosterEntry>,
    },
    RoomStatusChanged {
        status: RoomStatus,
    },
    RoomSettingsChanged {
        settings: RoomSettings,
    },
    ChatMessage(ChatMessage),
    Reaction(Reaction),
    /// A capture source could not be opened; the session carries on without it
    LocalMediaError {
        source: TrackSource,
        error: MediaError,
    },
    PeerStateChanged {
        participant_id: ParticipantId,
        state: LinkState,
    },
    ParticipantMediaLost {
        participant_id: ParticipantId,
    },
    RemoteTrack {
        participant_id: ParticipantId,
        track: RemoteTrackInfo,
    },
    RemoteMediaState {
        participant_id: ParticipantId,
        media: MediaFlags,
    },
    Moderation {
        from: ParticipantId,
        action: ModerationAction,
    },
    Speaking {
        speaking: bool,
        level: f32,
    },
    Notice {
        severity: Severity,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub state: LinkState,
    pub remote_tracks: Vec<RemoteTrackInfo>,
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub room: RoomRecord,
    pub me: ParticipantRecord,
    pub membership: MembershipState,
    pub roster: Vec<RosterEntry>,
    pub links: Vec<LinkSummary>,
}
