use std::sync::{Arc, PoisonError, RwLock};

use crate::chat::ChatMessage;
use crate::state::{
    ConnectionState, DeviceKind, DisconnectReason, SubscriptionState, TrackPublishState,
};

/// Discrete notifications emitted by the session controller.
///
/// Every state change is also visible in the next
/// [`SessionSnapshot`](crate::session::SessionSnapshot); these exist for
/// consumers that react to edges rather than levels.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    /// One-shot: the session dropped for a reason other than the user asking.
    DisconnectReasonAvailable(DisconnectReason),
    TrackPublishStateChanged {
        kind: DeviceKind,
        state: TrackPublishState,
    },
    ParticipantJoined(String),  // participant SID
    ParticipantLeft(String),    // participant SID
    SubscriptionChanged {
        participant_sid: String,
        track_sid: String,
        state: SubscriptionState,
    },
    MessageReceived(ChatMessage),
}

/// Receives [`SessionEvent`]s on the controller's task. Must not block.
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Fan-out to registered listeners. Clones share the listener list.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
