//! Scripted in-memory [`MediaEngine`] for controller tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::engine::{
    CaptureSource, EVENT_CHANNEL_CAPACITY, EngineConnectOptions, EngineEvent, EngineRoomOptions,
    EngineSession, LocalParticipantInfo, MediaEngine,
};
use crate::errors::EngineError;
use crate::state::{
    DeviceKind, DisconnectReason, LocalPublication, RemoteParticipant, RemotePublication,
    SubscriptionState, TrackKind, TrackSource,
};

pub const LOCAL_SID: &str = "PA_local";
pub const LOCAL_IDENTITY: &str = "local-user";

#[derive(Debug, Clone)]
pub struct ConnectCall {
    pub url: String,
    pub token: String,
    pub connect_options: EngineConnectOptions,
    pub room_options: EngineRoomOptions,
}

#[derive(Default)]
struct FakeState {
    events: Option<mpsc::Sender<EngineEvent>>,
    connect_error: Option<EngineError>,
    connect_gate: Option<Arc<Notify>>,
    device_errors: HashMap<DeviceKind, EngineError>,
    device_gates: HashMap<DeviceKind, Arc<Notify>>,
    unpublish_all_error: Option<EngineError>,
    unpublish_all_gate: Option<Arc<Notify>>,
    unpublish_all_calls: u32,
    reconnect_on_disconnect: bool,
    live: Vec<LocalPublication>,
    data_error: Option<EngineError>,
    facing_unsupported: bool,
    participants: Vec<RemoteParticipant>,
    connects: Vec<ConnectCall>,
    sent: Vec<Vec<u8>>,
    unpublished: Vec<String>,
    subscribe_requests: Vec<(String, String, bool)>,
    facing_switches: u32,
    next_sid: u32,
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_connect(&self, err: EngineError) {
        self.with(|s| s.connect_error = Some(err));
    }

    /// Hold the next connect until the returned gate is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with(|s| s.connect_gate = Some(gate.clone()));
        gate
    }

    pub fn fail_device(&self, kind: DeviceKind, err: EngineError) {
        self.with(|s| s.device_errors.insert(kind, err));
    }

    /// Hold the next operation on `kind` until the returned gate is notified.
    pub fn hold_device(&self, kind: DeviceKind) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with(|s| s.device_gates.insert(kind, gate.clone()));
        gate
    }

    pub fn fail_unpublish_all(&self, err: EngineError) {
        self.with(|s| s.unpublish_all_error = Some(err));
    }

    /// Hold the next unpublish-all after it has cleared the live tracks.
    pub fn hold_unpublish_all(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with(|s| s.unpublish_all_gate = Some(gate.clone()));
        gate
    }

    /// On disconnect, report a reconnect and then close the event stream
    /// without a `Disconnected` event.
    pub fn reconnect_on_disconnect(&self) {
        self.with(|s| s.reconnect_on_disconnect = true);
    }

    pub fn fail_data(&self, err: EngineError) {
        self.with(|s| s.data_error = Some(err));
    }

    pub fn set_facing_unsupported(&self) {
        self.with(|s| s.facing_unsupported = true);
    }

    pub fn add_participant(&self, participant: RemoteParticipant) {
        self.with(|s| s.participants.push(participant));
    }

    pub fn last_connect(&self) -> Option<ConnectCall> {
        self.with(|s| s.connects.last().cloned())
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.sent.clone())
    }

    pub fn unpublished(&self) -> Vec<String> {
        self.with(|s| s.unpublished.clone())
    }

    pub fn subscribe_requests(&self) -> Vec<(String, String, bool)> {
        self.with(|s| s.subscribe_requests.clone())
    }

    pub fn unpublish_all_calls(&self) -> u32 {
        self.with(|s| s.unpublish_all_calls)
    }

    /// Sids of the tracks currently published at the engine.
    pub fn live_tracks(&self) -> Vec<String> {
        self.with(|s| s.live.iter().map(|p| p.sid.clone()).collect())
    }

    pub fn facing_switches(&self) -> u32 {
        self.with(|s| s.facing_switches)
    }

    /// Push an event into the live session's stream.
    pub async fn emit(&self, event: EngineEvent) {
        let tx = self.with(|s| s.events.clone()).expect("engine not connected");
        tx.send(event).await.expect("event stream closed");
    }

    fn next_publication(&self, source: TrackSource) -> LocalPublication {
        self.with(|s| {
            s.next_sid += 1;
            let publication = LocalPublication {
                sid: format!("TR_{source:?}_{}", s.next_sid),
                source,
                muted: false,
            };
            s.live.push(publication.clone());
            publication
        })
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        connect_options: EngineConnectOptions,
        room_options: EngineRoomOptions,
    ) -> Result<EngineSession, EngineError> {
        let gate = self.with(|s| {
            s.connects.push(ConnectCall {
                url: url.to_string(),
                token: token.to_string(),
                connect_options,
                room_options,
            });
            s.connect_gate.take()
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.with(|s| {
            if let Some(err) = s.connect_error.take() {
                return Err(err);
            }
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            s.events = Some(tx);
            Ok(EngineSession {
                local: LocalParticipantInfo {
                    sid: LOCAL_SID.to_string(),
                    identity: LOCAL_IDENTITY.to_string(),
                },
                participants: s.participants.clone(),
                events: rx,
            })
        })
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        let (events, reconnect) = self.with(|s| (s.events.take(), s.reconnect_on_disconnect));
        if let (Some(tx), true) = (&events, reconnect) {
            let _ = tx.send(EngineEvent::Reconnected).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            return Ok(());
        }
        if let Some(tx) = events {
            let _ = tx
                .send(EngineEvent::Disconnected {
                    reason: DisconnectReason::UserInitiated,
                })
                .await;
        }
        Ok(())
    }

    async fn set_device_enabled(
        &self,
        kind: DeviceKind,
        enabled: bool,
    ) -> Result<Option<LocalPublication>, EngineError> {
        let gate = self.with(|s| s.device_gates.remove(&kind));
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.with(|s| s.device_errors.remove(&kind)) {
            return Err(err);
        }
        if !enabled {
            let source = TrackSource::from(kind);
            self.with(|s| s.live.retain(|p| p.source != source));
            return Ok(None);
        }
        Ok(Some(self.next_publication(kind.into())))
    }

    async fn publish_screen_share(
        &self,
        _source: CaptureSource,
    ) -> Result<LocalPublication, EngineError> {
        let gate = self.with(|s| s.device_gates.remove(&DeviceKind::ScreenShare));
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.next_publication(TrackSource::ScreenShare))
    }

    async fn unpublish(&self, track_sid: &str) -> Result<(), EngineError> {
        self.with(|s| {
            s.unpublished.push(track_sid.to_string());
            s.live.retain(|p| p.sid != track_sid);
        });
        Ok(())
    }

    async fn unpublish_all(&self) -> Result<(), EngineError> {
        let gate = self.with(|s| {
            s.unpublish_all_calls += 1;
            s.live.clear();
            s.unpublish_all_gate.take()
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.with(|s| s.unpublish_all_error.take()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn switch_camera_facing(
        &self,
        _publication: &LocalPublication,
    ) -> Result<(), EngineError> {
        self.with(|s| {
            if s.facing_unsupported {
                return Err(EngineError::Unsupported("fixed camera".into()));
            }
            s.facing_switches += 1;
            Ok(())
        })
    }

    async fn set_subscribed(
        &self,
        participant_sid: &str,
        track_sid: &str,
        subscribed: bool,
    ) -> Result<(), EngineError> {
        self.with(|s| {
            s.subscribe_requests
                .push((participant_sid.to_string(), track_sid.to_string(), subscribed))
        });
        Ok(())
    }

    async fn publish_data(&self, payload: Vec<u8>) -> Result<(), EngineError> {
        self.with(|s| {
            s.sent.push(payload);
            match s.data_error.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}

pub fn remote_participant(sid: &str, track_sid: &str) -> RemoteParticipant {
    RemoteParticipant {
        sid: sid.to_string(),
        identity: format!("identity-{sid}"),
        name: None,
        publications: vec![RemotePublication {
            sid: track_sid.to_string(),
            kind: TrackKind::Video,
            source: TrackSource::Camera,
            subscription: SubscriptionState::Subscribed,
            muted: false,
        }],
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
