mod channel;
mod hub;
mod message;
mod ws_transport;

pub use channel::{room_topic, RealtimeTransport, SignalingChannel};
pub use hub::MemoryHub;
pub use message::{
    ChatMessage, Envelope, IceCandidate, ModerationAction, PresenceMeta, Reaction, RelayFrame,
    SignalMessage,
};
pub use ws_transport::WsRealtimeTransport;
