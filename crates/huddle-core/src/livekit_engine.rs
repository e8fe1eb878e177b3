use std::sync::Arc;

use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::prelude::*;
use livekit::proto::DisconnectReason as LkDisconnectReason;
use livekit::track::{TrackKind as LkTrackKind, TrackSource as LkTrackSource};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::*;
use livekit::webrtc::video_source::native::NativeVideoSource;
use tokio::sync::{Mutex, mpsc};

use crate::engine::{
    CaptureSource, EVENT_CHANNEL_CAPACITY, EngineConnectOptions, EngineEvent, EngineRoomOptions,
    EngineSession, LocalParticipantInfo, MediaEngine, VideoDimensions,
};
use crate::errors::EngineError;
use crate::state::{
    self, DeviceKind, DisconnectReason, LocalPublication, RemotePublication, SubscriptionState,
    TrackKind, TrackSource,
};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

/// Capture sources of the currently published local tracks.
///
/// The host feeds captured frames into these.
#[derive(Default, Clone)]
pub struct LocalSources {
    pub microphone: Option<NativeAudioSource>,
    pub camera: Option<NativeVideoSource>,
    pub screen_share: Option<NativeVideoSource>,
}

struct Connected {
    room: Arc<Room>,
    options: EngineRoomOptions,
}

/// [`MediaEngine`] backed by the LiveKit Rust SDK.
///
/// The SDK's `RoomOptions` has no publish-only or stats-reporting switch, so
/// `EngineConnectOptions::publish_only` is only logged and
/// `EngineRoomOptions::report_stats` is not forwarded.
#[derive(Default)]
pub struct LiveKitEngine {
    room: Mutex<Option<Connected>>,
    sources: Mutex<LocalSources>,
}

impl LiveKitEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sources(&self) -> LocalSources {
        self.sources.lock().await.clone()
    }

    async fn current(&self) -> Result<(Arc<Room>, EngineRoomOptions), EngineError> {
        let guard = self.room.lock().await;
        let connected = guard.as_ref().ok_or(EngineError::Closed)?;
        Ok((connected.room.clone(), connected.options.clone()))
    }

    async fn publish(
        &self,
        room: &Room,
        track: LocalTrack,
        source: LkTrackSource,
        simulcast: bool,
    ) -> Result<LocalPublication, EngineError> {
        let publication = room
            .local_participant()
            .publish_track(
                track,
                TrackPublishOptions {
                    source,
                    simulcast,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::Transport(format!("publish {source:?}: {e}")))?;

        tracing::info!("{source:?} track published: {}", publication.sid());
        Ok(LocalPublication {
            sid: publication.sid().to_string(),
            source: source_from_lk(source),
            muted: publication.is_muted(),
        })
    }

    async fn publish_microphone(&self, room: &Room) -> Result<LocalPublication, EngineError> {
        let source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS,
            AUDIO_QUEUE_SIZE_MS,
        );
        let track =
            LocalAudioTrack::create_audio_track("microphone", RtcAudioSource::Native(source.clone()));
        let publication = self
            .publish(room, LocalTrack::Audio(track), LkTrackSource::Microphone, false)
            .await?;
        self.sources.lock().await.microphone = Some(source);
        Ok(publication)
    }

    async fn publish_video(
        &self,
        room: &Room,
        name: &str,
        kind: DeviceKind,
        dimensions: VideoDimensions,
        simulcast: bool,
    ) -> Result<LocalPublication, EngineError> {
        let is_screencast = kind == DeviceKind::ScreenShare;
        let source = NativeVideoSource::new(
            VideoResolution {
                width: dimensions.width,
                height: dimensions.height,
            },
            is_screencast,
        );
        let track = LocalVideoTrack::create_video_track(name, RtcVideoSource::Native(source.clone()));
        let lk_source = if is_screencast {
            LkTrackSource::Screenshare
        } else {
            LkTrackSource::Camera
        };
        let publication = self
            .publish(room, LocalTrack::Video(track), lk_source, simulcast)
            .await?;

        let mut sources = self.sources.lock().await;
        if is_screencast {
            sources.screen_share = Some(source);
        } else {
            sources.camera = Some(source);
        }
        Ok(publication)
    }

    async fn unpublish_source(&self, room: &Room, source: LkTrackSource) -> Result<(), EngineError> {
        let local = room.local_participant();
        let sids: Vec<_> = local
            .track_publications()
            .into_values()
            .filter(|p| p.source() == source)
            .map(|p| p.sid())
            .collect();
        for sid in sids {
            local
                .unpublish_track(&sid)
                .await
                .map_err(|e| EngineError::Transport(format!("unpublish {sid}: {e}")))?;
        }
        self.forget_source(source).await;
        Ok(())
    }

    async fn forget_source(&self, source: LkTrackSource) {
        let mut sources = self.sources.lock().await;
        match source {
            LkTrackSource::Microphone => sources.microphone = None,
            LkTrackSource::Camera => sources.camera = None,
            LkTrackSource::Screenshare => sources.screen_share = None,
            _ => {}
        }
    }
}

#[async_trait]
impl MediaEngine for LiveKitEngine {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        connect_options: EngineConnectOptions,
        room_options: EngineRoomOptions,
    ) -> Result<EngineSession, EngineError> {
        let mut options = RoomOptions::default();
        options.auto_subscribe = connect_options.auto_subscribe;
        options.adaptive_stream = room_options.adaptive_stream;
        options.dynacast = room_options.dynacast;
        if let Some(tag) = &connect_options.publish_only {
            tracing::info!("connecting publish-only as {tag} (not sent to the server)");
        }

        let (room, events) = Room::connect(url, token, options)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let room = Arc::new(room);

        let local = room.local_participant();
        let local = LocalParticipantInfo {
            sid: local.sid().to_string(),
            identity: local.identity().to_string(),
        };
        let participants = room
            .remote_participants()
            .values()
            .map(remote_participant)
            .collect();

        *self.room.lock().await = Some(Connected {
            room,
            options: room_options,
        });

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(forward_events(events, tx));

        Ok(EngineSession {
            local,
            participants,
            events: rx,
        })
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        let connected = self.room.lock().await.take();
        *self.sources.lock().await = LocalSources::default();
        match connected {
            Some(connected) => connected
                .room
                .close()
                .await
                .map_err(|e| EngineError::Transport(format!("close room: {e}"))),
            None => Ok(()),
        }
    }

    async fn set_device_enabled(
        &self,
        kind: DeviceKind,
        enabled: bool,
    ) -> Result<Option<LocalPublication>, EngineError> {
        let (room, options) = self.current().await?;
        if !enabled {
            self.unpublish_source(&room, device_source(kind)).await?;
            return Ok(None);
        }

        let publication = match kind {
            DeviceKind::Microphone => self.publish_microphone(&room).await?,
            DeviceKind::Camera => {
                self.publish_video(
                    &room,
                    "camera",
                    kind,
                    options.camera_capture,
                    options.simulcast,
                )
                .await?
            }
            DeviceKind::ScreenShare => {
                self.publish_video(
                    &room,
                    "screen",
                    kind,
                    options.screen_share_capture,
                    false,
                )
                .await?
            }
        };
        Ok(Some(publication))
    }

    async fn publish_screen_share(
        &self,
        source: CaptureSource,
    ) -> Result<LocalPublication, EngineError> {
        let (room, options) = self.current().await?;
        tracing::info!("sharing {} ({})", source.title, source.id);
        self.publish_video(
            &room,
            &source.title,
            DeviceKind::ScreenShare,
            options.screen_share_capture,
            false,
        )
        .await
    }

    async fn unpublish(&self, track_sid: &str) -> Result<(), EngineError> {
        let (room, _) = self.current().await?;
        let local = room.local_participant();
        let Some(publication) = local
            .track_publications()
            .into_values()
            .find(|p| p.sid().to_string() == track_sid)
        else {
            tracing::debug!("unpublish: {track_sid} already gone");
            return Ok(());
        };
        local
            .unpublish_track(&publication.sid())
            .await
            .map_err(|e| EngineError::Transport(format!("unpublish {track_sid}: {e}")))?;
        self.forget_source(publication.source()).await;
        Ok(())
    }

    async fn unpublish_all(&self) -> Result<(), EngineError> {
        let (room, _) = self.current().await?;
        let mut first_error = None;
        for source in [
            LkTrackSource::Microphone,
            LkTrackSource::Camera,
            LkTrackSource::Screenshare,
        ] {
            if let Err(e) = self.unpublish_source(&room, source).await {
                tracing::warn!("{e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn switch_camera_facing(
        &self,
        _publication: &LocalPublication,
    ) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(
            "camera facing is chosen by the capture host".into(),
        ))
    }

    async fn set_subscribed(
        &self,
        participant_sid: &str,
        track_sid: &str,
        subscribed: bool,
    ) -> Result<(), EngineError> {
        let (room, _) = self.current().await?;
        let publication = room
            .remote_participants()
            .into_values()
            .find(|p| p.sid().to_string() == participant_sid)
            .and_then(|p| {
                p.track_publications()
                    .into_values()
                    .find(|t| t.sid().to_string() == track_sid)
            })
            .ok_or_else(|| EngineError::Other(format!("no track {track_sid}")))?;
        publication.set_subscribed(subscribed);
        Ok(())
    }

    async fn publish_data(&self, payload: Vec<u8>) -> Result<(), EngineError> {
        let (room, _) = self.current().await?;
        room.local_participant()
            .publish_data(DataPacket {
                payload,
                reliable: true,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::Transport(format!("publish data: {e}")))
    }
}

/// Translate the SDK's room events until the room goes away.
async fn forward_events(
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    tx: mpsc::Sender<EngineEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(event) = translate(event) else {
            continue;
        };
        let is_terminal = matches!(event, EngineEvent::Disconnected { .. });
        if tx.send(event).await.is_err() || is_terminal {
            break;
        }
    }
    tracing::info!("room event loop ended");
}

fn translate(event: RoomEvent) -> Option<EngineEvent> {
    let event = match event {
        RoomEvent::Reconnecting => EngineEvent::Reconnecting,
        RoomEvent::Reconnected => EngineEvent::Reconnected,
        RoomEvent::Disconnected { reason } => EngineEvent::Disconnected {
            reason: disconnect_reason(reason),
        },
        RoomEvent::ParticipantConnected(participant) => {
            EngineEvent::ParticipantJoined(remote_participant(&participant))
        }
        RoomEvent::ParticipantDisconnected(participant) => EngineEvent::ParticipantLeft {
            participant_sid: participant.sid().to_string(),
        },
        RoomEvent::TrackPublished {
            publication,
            participant,
        } => EngineEvent::TrackPublished {
            participant_sid: participant.sid().to_string(),
            publication: remote_publication(&publication),
        },
        RoomEvent::TrackUnpublished {
            publication,
            participant,
        } => EngineEvent::TrackUnpublished {
            participant_sid: participant.sid().to_string(),
            track_sid: publication.sid().to_string(),
        },
        RoomEvent::TrackSubscribed {
            publication,
            participant,
            ..
        } => EngineEvent::SubscriptionChanged {
            participant_sid: participant.sid().to_string(),
            track_sid: publication.sid().to_string(),
            state: SubscriptionState::Subscribed,
        },
        RoomEvent::TrackUnsubscribed {
            publication,
            participant,
            ..
        } => EngineEvent::SubscriptionChanged {
            participant_sid: participant.sid().to_string(),
            track_sid: publication.sid().to_string(),
            state: SubscriptionState::Unsubscribed,
        },
        RoomEvent::TrackSubscriptionFailed {
            participant,
            track_sid,
            error,
        } => {
            tracing::warn!("subscription to {track_sid} failed: {error:?}");
            EngineEvent::SubscriptionChanged {
                participant_sid: participant.sid().to_string(),
                track_sid: track_sid.to_string(),
                state: SubscriptionState::NotAllowed,
            }
        }
        RoomEvent::TrackMuted {
            participant,
            publication,
        } => EngineEvent::TrackMuteChanged {
            participant_sid: participant.sid().to_string(),
            track_sid: publication.sid().to_string(),
            muted: true,
        },
        RoomEvent::TrackUnmuted {
            participant,
            publication,
        } => EngineEvent::TrackMuteChanged {
            participant_sid: participant.sid().to_string(),
            track_sid: publication.sid().to_string(),
            muted: false,
        },
        RoomEvent::LocalTrackUnpublished { publication, .. } => {
            EngineEvent::LocalTrackUnpublished {
                track_sid: publication.sid().to_string(),
            }
        }
        RoomEvent::DataReceived {
            payload,
            participant,
            ..
        } => EngineEvent::DataReceived {
            participant_sid: participant.map(|p| p.sid().to_string()),
            payload: payload.to_vec(),
        },
        other => {
            tracing::debug!("unhandled room event: {other:?}");
            return None;
        }
    };
    Some(event)
}

fn disconnect_reason(reason: LkDisconnectReason) -> DisconnectReason {
    match reason {
        LkDisconnectReason::ClientInitiated => DisconnectReason::UserInitiated,
        LkDisconnectReason::DuplicateIdentity => DisconnectReason::DuplicateIdentity,
        LkDisconnectReason::RoomDeleted => DisconnectReason::RoomDeleted,
        LkDisconnectReason::ServerShutdown
        | LkDisconnectReason::ParticipantRemoved
        | LkDisconnectReason::RoomClosed => DisconnectReason::ServerInitiated,
        LkDisconnectReason::SignalClose
        | LkDisconnectReason::JoinFailure
        | LkDisconnectReason::StateMismatch => DisconnectReason::NetworkFailure,
        _ => DisconnectReason::Unknown,
    }
}

fn source_from_lk(source: LkTrackSource) -> TrackSource {
    match source {
        LkTrackSource::Microphone => TrackSource::Microphone,
        LkTrackSource::Camera => TrackSource::Camera,
        LkTrackSource::Screenshare => TrackSource::ScreenShare,
        _ => TrackSource::Unknown,
    }
}

fn device_source(kind: DeviceKind) -> LkTrackSource {
    match kind {
        DeviceKind::Microphone => LkTrackSource::Microphone,
        DeviceKind::Camera => LkTrackSource::Camera,
        DeviceKind::ScreenShare => LkTrackSource::Screenshare,
    }
}

fn remote_publication(publication: &RemoteTrackPublication) -> RemotePublication {
    RemotePublication {
        sid: publication.sid().to_string(),
        kind: match publication.kind() {
            LkTrackKind::Audio => TrackKind::Audio,
            LkTrackKind::Video => TrackKind::Video,
        },
        source: source_from_lk(publication.source()),
        subscription: if publication.is_subscribed() {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::Unsubscribed
        },
        muted: publication.is_muted(),
    }
}

fn remote_participant(participant: &RemoteParticipant) -> state::RemoteParticipant {
    let name = participant.name().to_string();
    state::RemoteParticipant {
        sid: participant.sid().to_string(),
        identity: participant.identity().to_string(),
        name: (!name.is_empty()).then_some(name),
        publications: participant
            .track_publications()
            .values()
            .map(remote_publication)
            .collect(),
    }
}
