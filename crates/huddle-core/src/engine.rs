//! Seam to the real-time media engine.
//!
//! The engine owns transport, signaling and media pipelines. The session
//! core only sees the room/participant/track abstractions below and the
//! ordered [`EngineEvent`] stream handed back by [`MediaEngine::connect`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::EngineError;
use crate::state::{
    DeviceKind, DisconnectReason, LocalPublication, RemoteParticipant, RemotePublication,
    SubscriptionState,
};

/// Capacity engine implementations should use for their event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub const H1080: VideoDimensions = VideoDimensions {
        width: 1920,
        height: 1080,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConnectOptions {
    pub auto_subscribe: bool,
    /// Set in publish-only mode; unique per connect.
    pub publish_only: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRoomOptions {
    pub simulcast: bool,
    pub adaptive_stream: bool,
    pub dynacast: bool,
    pub report_stats: bool,
    pub camera_capture: VideoDimensions,
    pub screen_share_capture: VideoDimensions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipantInfo {
    pub sid: String,
    pub identity: String,
}

/// A screen or window the caller picked for screen sharing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSource {
    pub id: String,
    pub title: String,
}

/// Result of a successful [`MediaEngine::connect`].
#[derive(Debug)]
pub struct EngineSession {
    pub local: LocalParticipantInfo,
    /// Remote participants already in the room at join time.
    pub participants: Vec<RemoteParticipant>,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Lifecycle notifications produced by the engine, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Reconnecting,
    Reconnected,
    Disconnected {
        reason: DisconnectReason,
    },
    ParticipantJoined(RemoteParticipant),
    ParticipantLeft {
        participant_sid: String,
    },
    TrackPublished {
        participant_sid: String,
        publication: RemotePublication,
    },
    TrackUnpublished {
        participant_sid: String,
        track_sid: String,
    },
    SubscriptionChanged {
        participant_sid: String,
        track_sid: String,
        state: SubscriptionState,
    },
    /// Mute change for any participant, local included.
    TrackMuteChanged {
        participant_sid: String,
        track_sid: String,
        muted: bool,
    },
    /// The engine dropped one of the local participant's publications.
    LocalTrackUnpublished {
        track_sid: String,
    },
    DataReceived {
        participant_sid: Option<String>,
        payload: Vec<u8>,
    },
}

/// Operations the session core consumes from the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        connect_options: EngineConnectOptions,
        room_options: EngineRoomOptions,
    ) -> Result<EngineSession, EngineError>;

    async fn disconnect(&self) -> Result<(), EngineError>;

    /// Enable or disable a device track. Returns the publication when the
    /// device ends up published.
    async fn set_device_enabled(
        &self,
        kind: DeviceKind,
        enabled: bool,
    ) -> Result<Option<LocalPublication>, EngineError>;

    /// Publish a screen-share track for an explicitly selected source.
    async fn publish_screen_share(
        &self,
        source: CaptureSource,
    ) -> Result<LocalPublication, EngineError>;

    async fn unpublish(&self, track_sid: &str) -> Result<(), EngineError>;

    async fn unpublish_all(&self) -> Result<(), EngineError>;

    /// Flip the camera between front and back facing. Engines whose capture
    /// source cannot switch return [`EngineError::Unsupported`].
    async fn switch_camera_facing(&self, publication: &LocalPublication)
        -> Result<(), EngineError>;

    async fn set_subscribed(
        &self,
        participant_sid: &str,
        track_sid: &str,
        subscribed: bool,
    ) -> Result<(), EngineError>;

    async fn publish_data(&self, payload: Vec<u8>) -> Result<(), EngineError>;
}
