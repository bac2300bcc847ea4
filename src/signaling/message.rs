use serde::{Deserialize, Serialize};

use crate::model::{now_millis, MediaFlags, ParticipantId, Role, RoomSettings, RoomStatus};

/// What a participant advertises on the room topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub participant_id: ParticipantId,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub joined_at: u64,
    #[serde(default)]
    pub media: MediaFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Host moderation request. Advisory: receivers comply cooperatively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ModerationAction {
    MuteAll,
    Lock { locked: bool },
    Remove { participant_id: ParticipantId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    PresenceJoin {
        meta: PresenceMeta,
    },

    PresenceLeave {
        participant_id: ParticipantId,
    },

    Offer {
        sdp: String,
    },

    Answer {
        sdp: String,
    },

    IceCandidate {
        candidate: IceCandidate,
    },

    Chat {
        id: String,
        text: String,
    },

    Reaction {
        id: String,
        emoji: String,
    },

    RoomStatus {
        status: RoomStatus,
    },

    RoomSettings {
        settings: RoomSettings,
    },

    Moderation {
        action: ModerationAction,
    },

    MediaState {
        media: MediaFlags,
    },

    /// Responder asks the initiator for a fresh offer
    Renegotiate,
}

impl SignalMessage {
    /// Negotiation payloads must only travel point-to-point.
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            SignalMessage::Offer { .. }
                | SignalMessage::Answer { .. }
                | SignalMessage::IceCandidate { .. }
                | SignalMessage::Renegotiate
        )
    }
}

/// Transport envelope; `target == None` means broadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: ParticipantId,
    pub from_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ParticipantId>,
    pub sent_at: u64,
    pub message: SignalMessage,
}

impl Envelope {
    pub fn new(from: &PresenceMeta, target: Option<ParticipantId>, message: SignalMessage) -> Self {
        Self {
            from: from.participant_id.clone(),
            from_name: from.display_name.clone(),
            target,
            sent_at: now_millis(),
            message,
        }
    }

    pub fn presence_join(meta: &PresenceMeta) -> Self {
        Self::new(meta, None, SignalMessage::PresenceJoin { meta: meta.clone() })
    }

    pub fn presence_leave(meta: &PresenceMeta) -> Self {
        Self::new(
            meta,
            None,
            SignalMessage::PresenceLeave {
                participant_id: meta.participant_id.clone(),
            },
        )
    }
}

/// Ephemeral chat line as seen by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: ParticipantId,
    pub sender_name: String,
    pub text: String,
    pub sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: String,
    pub sender_id: ParticipantId,
    pub sender_name: String,
    pub emoji: String,
    pub sent_at: u64,
}

/// Frames between `WsRealtimeTransport` and the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum RelayFrame {
    Join { topic: String, meta: PresenceMeta },
    Publish { envelope: Envelope },
    Leave,
    Deliver { envelope: Envelope },
    Error { message: String },
}
