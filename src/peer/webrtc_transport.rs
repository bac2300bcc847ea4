use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use super::transport::{
    PeerTransport, PeerTransportFactory, RemoteTrackInfo, TrackSwap, TransportEvent, TransportState,
};
use super::webrtc_utils::{create_webrtc_api, get_ice_servers};
use crate::config::IceConfig;
use crate::error::{LiveError, Result};
use crate::media::{LocalTrack, TrackKind};
use crate::model::ParticipantId;
use crate::signaling::IceCandidate;

/// Creates one `RTCPeerConnection` per remote participant from a shared API.
pub struct WebRtcTransportFactory {
    api: Arc<API>,
    ice: IceConfig,
}

impl WebRtcTransportFactory {
    pub fn new(ice: IceConfig) -> Result<Self> {
        Ok(Self {
            api: create_webrtc_api()?,
            ice,
        })
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        _local: &ParticipantId,
        remote: &ParticipantId,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let config = RTCConfiguration {
            ice_servers: get_ice_servers(&self.ice),
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| LiveError::PeerConnectionCreation(e.to_string()))?,
        );

        {
            let events = events.clone();
            let remote = remote.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                let events = events.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(TransportEvent::LocalCandidate {
                                remote,
                                candidate: IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                },
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to serialize ICE candidate"),
                    }
                })
            }));
        }

        {
            let events = events.clone();
            let remote = remote.clone();
            pc.on_peer_connection_state_change(Box::new(move |state| {
                let events = events.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    let state = match state {
                        RTCPeerConnectionState::Connecting => TransportState::Connecting,
                        RTCPeerConnectionState::Connected => TransportState::Connected,
                        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                        RTCPeerConnectionState::Failed => TransportState::Failed,
                        RTCPeerConnectionState::Closed => TransportState::Closed,
                        _ => return,
                    };
                    tracing::debug!(participant_id = %remote, state = ?state, "Peer connection state");
                    let _ = events.send(TransportEvent::StateChanged { remote, state });
                })
            }));
        }

        {
            let remote = remote.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    _ => None,
                };
                let track_id = track.id();
                let events = events.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    if let Some(kind) = kind {
                        let _ = events.send(TransportEvent::RemoteTrack {
                            remote,
                            track: RemoteTrackInfo { track_id, kind },
                        });
                    }
                })
            }));
        }

        tracing::debug!(participant_id = %remote, "Created peer connection");
        Ok(Arc::new(WebRtcTransport {
            pc,
            senders: Mutex::new(HashMap::new()),
            receive_only: Mutex::new(HashSet::new()),
        }))
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
    receive_only: Mutex<HashSet<TrackKind>>,
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn as_track_local(track: &LocalTrack) -> Arc<dyn TrackLocal + Send + Sync> {
    track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>
}

impl WebRtcTransport {
    /// An offer without a sender for a kind still has to ask for the remote's media.
    async fn ensure_receivers(&self) -> Result<()> {
        let senders = self.senders.lock().await;
        let mut receive_only = self.receive_only.lock().await;
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if senders.contains_key(&kind) || receive_only.contains(&kind) {
                continue;
            }
            self.pc
                .add_transceiver_from_kind(codec_type(kind), None)
                .await
                .map_err(|e| LiveError::webrtc_api(format!("Failed to add {} transceiver: {}", kind, e)))?;
            receive_only.insert(kind);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String> {
        self.ensure_receivers().await?;
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| LiveError::CreateOfferFailed(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| LiveError::CreateOfferFailed(e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| LiveError::CreateAnswerFailed(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| LiveError::CreateAnswerFailed(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer =
            RTCSessionDescription::offer(sdp.to_string()).map_err(|e| LiveError::InvalidSdp(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| LiveError::SetRemoteDescriptionFailed(e.to_string()))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer =
            RTCSessionDescription::answer(sdp.to_string()).map_err(|e| LiveError::InvalidSdp(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| LiveError::SetRemoteDescriptionFailed(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| LiveError::AddIceCandidateFailed(e.to_string()))
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        let sender = self.pc.add_track(as_track_local(track)).await?;
        self.senders.lock().await.insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: Option<&LocalTrack>) -> Result<TrackSwap> {
        let existing = self.senders.lock().await.get(&kind).cloned();
        match (existing, track) {
            (Some(sender), track) => {
                sender
                    .replace_track(track.map(as_track_local))
                    .await
                    .map_err(|e| LiveError::ReplaceTrackFailed(e.to_string()))?;
                Ok(TrackSwap::Replaced)
            }
            (None, Some(track)) => {
                self.attach_track(track).await?;
                Ok(TrackSwap::Added)
            }
            (None, None) => Ok(TrackSwap::Unchanged),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!(error = %e, "Peer connection close failed");
        }
    }
}
