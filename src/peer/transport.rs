use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::{LocalTrack, TrackKind};
use crate::model::ParticipantId;
use crate::signaling::IceCandidate;

/// Connection state as reported by the underlying transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub kind: TrackKind,
}

/// Callbacks from a transport, funneled into the session actor.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    LocalCandidate {
        remote: ParticipantId,
        candidate: IceCandidate,
    },
    StateChanged {
        remote: ParticipantId,
        state: TransportState,
    },
    RemoteTrack {
        remote: ParticipantId,
        track: RemoteTrackInfo,
    },
}

/// Outcome of swapping an outgoing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSwap {
    /// An existing sender now carries the new track
    Replaced,
    /// A sender had to be added; the session must renegotiate
    Added,
    /// Nothing to do
    Unchanged,
}

/// One peer-to-peer media connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates an offer and applies it as the local description.
    async fn create_offer(&self) -> Result<String>;

    /// Creates an answer and applies it as the local description.
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_offer(&self, sdp: &str) -> Result<()>;

    async fn set_remote_answer(&self, sdp: &str) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn attach_track(&self, track: &LocalTrack) -> Result<()>;

    /// `None` stops sending on the `kind` sender without removing it.
    async fn replace_track(&self, kind: TrackKind, track: Option<&LocalTrack>) -> Result<TrackSwap>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
