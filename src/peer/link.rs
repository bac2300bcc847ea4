use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::transport::{PeerTransport, RemoteTrackInfo};
use crate::media::TrackKind;
use crate::signaling::PresenceMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl LinkState {
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, next),
            (New, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Connected)
                | (New | Connecting | Connected | Disconnected, Closed)
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Which side sends offers on this link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

/// Media connection to one remote participant.
pub struct PeerLink {
    pub remote: PresenceMeta,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub role: NegotiationRole,
    state: LinkState,
    pub(crate) remote_description_set: bool,
    pub(crate) remote_tracks: HashMap<TrackKind, RemoteTrackInfo>,
    pub(crate) disconnected_since: Option<Instant>,
}

impl PeerLink {
    pub(crate) fn new(remote: PresenceMeta, transport: Arc<dyn PeerTransport>, role: NegotiationRole) -> Self {
        Self {
            remote,
            transport,
            role,
            state: LinkState::New,
            remote_description_set: false,
            remote_tracks: HashMap::new(),
            disconnected_since: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn remote_track(&self, kind: TrackKind) -> Option<&RemoteTrackInfo> {
        self.remote_tracks.get(&kind)
    }

    /// Applies `next` if it is a legal step; returns whether the state changed.
    pub(crate) fn transition(&mut self, next: LinkState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                participant_id = %self.remote.participant_id,
                from = %self.state,
                to = %next,
                "Ignoring invalid link transition"
            );
            return false;
        }

        self.disconnected_since = match next {
            LinkState::Disconnected => Some(Instant::now()),
            _ => None,
        };
        self.state = next;
        true
    }
}
