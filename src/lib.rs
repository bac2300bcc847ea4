pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod model;
pub mod peer;
pub mod presence;
pub mod room;
pub mod signaling;
pub mod store;

pub use config::Config;
pub use error::{LiveError, Result, Severity};
pub use room::{RoomSessionController, SessionDeps, SessionEvent, SessionHandle};
