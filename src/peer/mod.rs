mod link;
#[cfg(test)]
pub(crate) mod loopback;
mod manager;
mod transport;
mod webrtc_transport;
pub mod webrtc_utils;

pub use link::{LinkState, NegotiationRole, PeerLink};
pub use manager::{PeerConnectionManager, PeerEvent};
pub use transport::{
    PeerTransport, PeerTransportFactory, RemoteTrackInfo, TrackSwap, TransportEvent, TransportState,
};
pub use webrtc_transport::{WebRtcTransport, WebRtcTransportFactory};
