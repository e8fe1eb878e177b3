use std::fmt;

use crate::errors::EngineError;

/// Why a session ended up in [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    UserInitiated,
    NetworkFailure,
    ServerInitiated,
    DuplicateIdentity,
    RoomDeleted,
    Unknown,
}

impl DisconnectReason {
    pub fn is_user_initiated(self) -> bool {
        self == Self::UserInitiated
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected(Option<DisconnectReason>),
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnecting,
}

impl ConnectionState {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }

    /// True while the engine holds a live room (including transient reconnects).
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected(None)
    }
}

/// Local capture device kinds managed by the publication coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Camera,
    Microphone,
    ScreenShare,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [Self::Camera, Self::Microphone, Self::ScreenShare];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::ScreenShare => "screen share",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
    Unknown,
}

impl From<DeviceKind> for TrackSource {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Camera => Self::Camera,
            DeviceKind::Microphone => Self::Microphone,
            DeviceKind::ScreenShare => Self::ScreenShare,
        }
    }
}

/// Handle to a track the local participant has published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPublication {
    pub sid: String,
    pub source: TrackSource,
    pub muted: bool,
}

/// Publish state of one local device kind.
///
/// `Busy` is only entered from one of the two settled states and always
/// resolves back to one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackPublishState {
    NotPublished(Option<EngineError>),
    Busy { is_publishing: bool },
    Published(LocalPublication),
}

impl TrackPublishState {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }

    pub fn publication(&self) -> Option<&LocalPublication> {
        match self {
            Self::Published(publication) => Some(publication),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::NotPublished(err) => err.as_ref(),
            _ => None,
        }
    }
}

impl Default for TrackPublishState {
    fn default() -> Self {
        Self::NotPublished(None)
    }
}

/// Subscription state of a remote publication.
///
/// `NotAllowed` sticks until the consumer asks to subscribe again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePublication {
    pub sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub subscription: SubscriptionState,
    pub muted: bool,
}

/// A track publication seen by the session, local or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    Local(LocalPublication),
    Remote(RemotePublication),
}

impl Publication {
    pub fn sid(&self) -> &str {
        match self {
            Self::Local(p) => &p.sid,
            Self::Remote(p) => &p.sid,
        }
    }

    pub fn source(&self) -> TrackSource {
        match self {
            Self::Local(p) => p.source,
            Self::Remote(p) => p.source,
        }
    }

    pub fn is_muted(&self) -> bool {
        match self {
            Self::Local(p) => p.muted,
            Self::Remote(p) => p.muted,
        }
    }

    /// Local publications are always available to their owner.
    pub fn subscription_state(&self) -> SubscriptionState {
        match self {
            Self::Local(_) => SubscriptionState::Subscribed,
            Self::Remote(p) => p.subscription,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
    pub publications: Vec<RemotePublication>,
}

impl RemoteParticipant {
    pub fn publication(&self, track_sid: &str) -> Option<&RemotePublication> {
        self.publications.iter().find(|p| p.sid == track_sid)
    }

    pub fn publication_mut(&mut self, track_sid: &str) -> Option<&mut RemotePublication> {
        self.publications.iter_mut().find(|p| p.sid == track_sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_user_reason_is_user_initiated() {
        assert!(DisconnectReason::UserInitiated.is_user_initiated());
        assert!(!DisconnectReason::NetworkFailure.is_user_initiated());
        assert!(!DisconnectReason::Unknown.is_user_initiated());
    }

    #[test]
    fn publish_state_accessors() {
        let publication = LocalPublication {
            sid: "TR_1".into(),
            source: TrackSource::Camera,
            muted: false,
        };
        let published = TrackPublishState::Published(publication.clone());
        assert!(published.is_published());
        assert_eq!(published.publication(), Some(&publication));

        let failed = TrackPublishState::NotPublished(Some(EngineError::Other("boom".into())));
        assert!(!failed.is_published());
        assert!(failed.error().is_some());

        assert!(TrackPublishState::Busy { is_publishing: true }.is_busy());
        assert_eq!(TrackPublishState::default(), TrackPublishState::NotPublished(None));
    }

    #[test]
    fn remote_publication_capabilities() {
        let remote = Publication::Remote(RemotePublication {
            sid: "TR_r".into(),
            kind: TrackKind::Audio,
            source: TrackSource::Microphone,
            subscription: SubscriptionState::NotAllowed,
            muted: true,
        });
        assert!(remote.is_muted());
        assert_eq!(remote.subscription_state(), SubscriptionState::NotAllowed);

        let local = Publication::Local(LocalPublication {
            sid: "TR_l".into(),
            source: TrackSource::Camera,
            muted: false,
        });
        assert_eq!(local.subscription_state(), SubscriptionState::Subscribed);
        assert_eq!(local.sid(), "TR_l");
    }

    #[test]
    fn live_states() {
        assert!(ConnectionState::Connected.is_live());
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_live());
        assert!(!ConnectionState::Connecting.is_live());
        assert!(ConnectionState::default().is_disconnected());
    }
}
