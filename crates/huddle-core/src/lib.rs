//! Huddle core session logic.
//!
//! Room connection state machine and local track publication coordinator.
//! Media and signaling are reached through the [`engine::MediaEngine`] trait;
//! the `livekit` feature provides an implementation backed by the LiveKit SDK.

pub mod chat;
pub mod coordinator;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod events;
pub mod logging;
pub mod platform;
pub mod session;
pub mod settings;
pub mod state;

#[cfg(feature = "livekit")]
pub mod livekit_engine;

#[cfg(test)]
mod test_support;

pub use chat::ChatMessage;
pub use engine::MediaEngine;
pub use errors::{ConnectionError, DisconnectError, EngineError, TrackError};
pub use events::{SessionEvent, SessionEventListener};
pub use logging::init_logging;
pub use session::{RoomSession, SessionSnapshot};
pub use settings::{PreferencesStore, SessionOptions};
pub use state::{ConnectionState, DeviceKind, DisconnectReason, TrackPublishState};
