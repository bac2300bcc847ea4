mod command;
mod controller;
mod events;
mod session;
#[cfg(test)]
mod tests;

pub use controller::{RoomSessionController, SessionDeps, SessionHandle};
pub use events::{LinkSummary, MembershipState, SessionEvent, SessionSnapshot};
