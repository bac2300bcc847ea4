use tokio::sync::oneshot;

use super::events::SessionSnapshot;
use crate::error::Result;
use crate::media::TrackKind;
use crate::model::ParticipantId;
use crate::signaling::{ChatMessage, Reaction};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests from a `SessionHandle` to its session actor.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    StartStream { reply: Reply<()> },
    EndStream { reply: Reply<()> },
    SetRecording { enabled: bool, reply: Reply<()> },
    MuteAll { reply: Reply<()> },
    LockRoom { locked: bool, reply: Reply<()> },
    RemoveParticipant { participant_id: ParticipantId, reply: Reply<()> },
    SetAudio { enabled: bool, reply: Reply<()> },
    SetVideo { enabled: bool, reply: Reply<()> },
    SwitchDevice { kind: TrackKind, device_id: String, reply: Reply<()> },
    StartScreenShare { reply: Reply<()> },
    StopScreenShare { reply: Reply<()> },
    SendChat { text: String, reply: Reply<ChatMessage> },
    SendReaction { emoji: String, reply: Reply<Reaction> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
}

/// What travels on the handle's channel. `Leave` ends the actor loop, so it
/// never reaches the command dispatcher.
#[derive(Debug)]
pub(crate) enum SessionRequest {
    Command(SessionCommand),
    /// Answered once teardown has finished
    Leave(oneshot::Sender<()>),
}
