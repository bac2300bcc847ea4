//! In-process peer transport used by the session tests.
//!
//! Transports created for `(a, b)` and `(b, a)` are paired: a side reports
//! `Connected` once both its descriptions are applied, and tracks it sends
//! surface on the paired side as remote tracks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::transport::{
    PeerTransport, PeerTransportFactory, RemoteTrackInfo, TrackSwap, TransportEvent, TransportState,
};
use crate::error::{LiveError, Result};
use crate::media::{LocalTrack, TrackKind};
use crate::model::ParticipantId;
use crate::signaling::IceCandidate;

type Sides = Arc<Mutex<HashMap<(ParticipantId, ParticipantId), Arc<LoopbackTransport>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetRemoteOffer(String),
    SetRemoteAnswer(String),
    AddCandidate(String),
    Attach(String),
    Replace(TrackKind, Option<String>),
    Close,
}

#[derive(Default)]
pub struct LoopbackNetwork {
    sides: Sides,
    created: AtomicUsize,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn transport(&self, local: &str, remote: &str) -> Option<Arc<LoopbackTransport>> {
        let sides = self.sides.lock().unwrap();
        sides
            .get(&(ParticipantId::from(local), ParticipantId::from(remote)))
            .cloned()
    }
}

#[async_trait]
impl PeerTransportFactory for LoopbackNetwork {
    async fn create(
        &self,
        local: &ParticipantId,
        remote: &ParticipantId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(LoopbackTransport {
            local: local.clone(),
            remote: remote.clone(),
            events,
            sides: self.sides.clone(),
            state: Mutex::new(SideState::default()),
        });
        self.sides
            .lock()
            .unwrap()
            .insert((local.clone(), remote.clone()), transport.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(transport)
    }
}

#[derive(Default)]
struct SideState {
    local_set: bool,
    remote_set: bool,
    connected: bool,
    closed: bool,
    senders: HashMap<TrackKind, Option<LocalTrack>>,
    candidates: usize,
    calls: Vec<Call>,
}

pub struct LoopbackTransport {
    local: ParticipantId,
    remote: ParticipantId,
    events: mpsc::UnboundedSender<TransportEvent>,
    sides: Sides,
    state: Mutex<SideState>,
}

impl LoopbackTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Reports a network-level state change as the real transport would.
    pub fn simulate(&self, state: TransportState) {
        let _ = self.events.send(TransportEvent::StateChanged {
            remote: self.remote.clone(),
            state,
        });
    }

    fn paired(&self) -> Option<Arc<LoopbackTransport>> {
        let sides = self.sides.lock().unwrap();
        sides.get(&(self.remote.clone(), self.local.clone())).cloned()
    }

    fn sending(&self) -> Vec<LocalTrack> {
        let state = self.state.lock().unwrap();
        state.senders.values().flatten().cloned().collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(LiveError::PeerLinkNotFound(self.remote.to_string()));
        }
        state.calls.push(call);
        Ok(())
    }

    fn local_description_applied(&self) {
        let candidate = {
            let mut state = self.state.lock().unwrap();
            state.local_set = true;
            state.candidates += 1;
            IceCandidate {
                candidate: format!("candidate:{} 1 udp 1 127.0.0.1 {} typ host", self.local, 9000 + state.candidates),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            }
        };
        let _ = self.events.send(TransportEvent::LocalCandidate {
            remote: self.remote.clone(),
            candidate,
        });
        self.maybe_connect();
    }

    fn remote_description_applied(&self) {
        self.state.lock().unwrap().remote_set = true;
        self.maybe_connect();
    }

    fn maybe_connect(&self) {
        let newly_connected = {
            let mut state = self.state.lock().unwrap();
            let ready = state.local_set && state.remote_set && !state.connected;
            if ready {
                state.connected = true;
            }
            ready
        };
        if !newly_connected {
            return;
        }

        let _ = self.events.send(TransportEvent::StateChanged {
            remote: self.remote.clone(),
            state: TransportState::Connecting,
        });
        let _ = self.events.send(TransportEvent::StateChanged {
            remote: self.remote.clone(),
            state: TransportState::Connected,
        });

        if let Some(paired) = self.paired() {
            for track in paired.sending() {
                self.deliver_remote(&track);
            }
        }
    }

    /// Surfaces a track sent by the paired side on this side.
    fn deliver_remote(&self, track: &LocalTrack) {
        let _ = self.events.send(TransportEvent::RemoteTrack {
            remote: self.remote.clone(),
            track: RemoteTrackInfo {
                track_id: track.id().to_string(),
                kind: track.kind(),
            },
        });
    }

    fn announce(&self, track: &LocalTrack) {
        let connected = self.state.lock().unwrap().connected;
        if !connected {
            return;
        }
        if let Some(paired) = self.paired() {
            if paired.state.lock().unwrap().connected {
                paired.deliver_remote(track);
            }
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<String> {
        self.record(Call::CreateOffer)?;
        self.local_description_applied();
        Ok(format!("offer:{}->{}", self.local, self.remote))
    }

    async fn create_answer(&self) -> Result<String> {
        self.record(Call::CreateAnswer)?;
        self.local_description_applied();
        Ok(format!("answer:{}->{}", self.local, self.remote))
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        self.record(Call::SetRemoteOffer(sdp.to_string()))?;
        self.remote_description_applied();
        Ok(())
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        self.record(Call::SetRemoteAnswer(sdp.to_string()))?;
        self.remote_description_applied();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Call::AddCandidate(candidate.candidate))
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(Call::Attach(track.id().to_string()))?;
        self.state
            .lock()
            .unwrap()
            .senders
            .insert(track.kind(), Some(track.clone()));
        self.announce(track);
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: Option<&LocalTrack>) -> Result<TrackSwap> {
        self.record(Call::Replace(kind, track.map(|t| t.id().to_string())))?;
        let swap = {
            let mut state = self.state.lock().unwrap();
            match (state.senders.contains_key(&kind), track) {
                (true, track) => {
                    state.senders.insert(kind, track.cloned());
                    TrackSwap::Replaced
                }
                (false, Some(track)) => {
                    state.senders.insert(kind, Some(track.clone()));
                    TrackSwap::Added
                }
                (false, None) => TrackSwap::Unchanged,
            }
        };
        if let Some(track) = track {
            self.announce(track);
        }
        Ok(swap)
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.calls.push(Call::Close);
            state.closed = true;
        }
    }
}
