//! Room session controller.
//!
//! All session state lives in one actor task. [`RoomSession`] handles post
//! commands to it; engine calls run on spawned tasks and post their results
//! back, so every mutation happens on the actor, one at a time. Consumers
//! read state through [`SessionSnapshot`]s published on a `watch` channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::chat::ChatMessage;
use crate::coordinator::{DeviceOp, Reconciled, Ticket, TrackPublicationCoordinator, TrackStates};
use crate::dispatcher::{RoomEventDispatcher, RoomNotification};
use crate::engine::{
    CaptureSource, EngineConnectOptions, EngineEvent, EngineRoomOptions, EngineSession,
    LocalParticipantInfo, MediaEngine, VideoDimensions,
};
use crate::errors::{ConnectionError, DisconnectError, EngineError, TrackError};
use crate::events::{EventEmitter, SessionEvent, SessionEventListener};
use crate::platform::{Capabilities, IdleInhibitor, NoopIdleInhibitor};
use crate::settings::{ConnectionHistoryEntry, PreferencesStore, SessionOptions};
use crate::state::{
    ConnectionState, DeviceKind, DisconnectReason, LocalPublication, Publication,
    RemoteParticipant,
};

const COMMAND_CAPACITY: usize = 64;
const INTERNAL_CAPACITY: usize = 256;

/// Immutable view of the session, replaced wholesale on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub url: Option<String>,
    pub options: SessionOptions,
    /// Unique tag sent to the server in publish-only mode.
    pub publish_only_id: Option<String>,
    pub local: Option<LocalParticipantInfo>,
    pub last_disconnect_reason: Option<DisconnectReason>,
    /// Set once per unexpected disconnect until acknowledged.
    pub pending_disconnect_reason: Option<DisconnectReason>,
    pub tracks: TrackStates,
    /// Shared with earlier snapshots until the next message arrives.
    pub messages: Arc<Vec<ChatMessage>>,
    pub participants: Vec<RemoteParticipant>,
}

impl SessionSnapshot {
    pub fn local_publications(&self) -> Vec<Publication> {
        DeviceKind::ALL
            .into_iter()
            .filter_map(|kind| self.tracks.get(kind).publication().cloned())
            .map(Publication::Local)
            .collect()
    }

    pub fn participant(&self, sid: &str) -> Option<&RemoteParticipant> {
        self.participants.iter().find(|p| p.sid == sid)
    }
}

/// Engine-level options for a connect with the given session options.
///
/// Publish-only mode suppresses auto-subscribe and simulcast and tags the
/// session with a fresh identifier.
pub fn engine_options(options: &SessionOptions) -> (EngineConnectOptions, EngineRoomOptions) {
    let connect = EngineConnectOptions {
        auto_subscribe: !options.publish_mode && options.auto_subscribe,
        publish_only: options
            .publish_mode
            .then(|| format!("publish_{}", uuid::Uuid::new_v4())),
    };
    let room = EngineRoomOptions {
        simulcast: !options.publish_mode && options.simulcast,
        adaptive_stream: options.adaptive_stream,
        dynacast: options.dynacast,
        report_stats: options.report_stats,
        camera_capture: VideoDimensions::H1080,
        screen_share_capture: VideoDimensions::H1080,
    };
    (connect, room)
}

fn validate_url(url: &str) -> Result<(), ConnectionError> {
    let parsed =
        url::Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" | "http" | "https" => Ok(()),
        other => Err(ConnectionError::InvalidUrl(format!(
            "unsupported scheme {other:?}"
        ))),
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        url: String,
        token: String,
        options: SessionOptions,
        reply: Reply<Result<SessionSnapshot, ConnectionError>>,
    },
    Disconnect {
        reply: Reply<Result<(), DisconnectError>>,
    },
    Toggle {
        kind: DeviceKind,
        source: Option<CaptureSource>,
        reply: Reply<Result<(), TrackError>>,
    },
    SwitchCameraFacing {
        reply: Reply<Result<(), TrackError>>,
    },
    UnpublishAll {
        reply: Reply<()>,
    },
    SetSubscribed {
        participant_sid: String,
        track_sid: String,
        subscribed: bool,
        reply: Reply<Result<(), TrackError>>,
    },
    SendMessage {
        text: String,
        reply: Reply<Option<ChatMessage>>,
    },
    AcknowledgeDisconnect,
}

/// Completions and engine notifications posted back to the actor.
enum Internal {
    ConnectFinished {
        session_id: u64,
        result: Result<EngineSession, EngineError>,
        reply: Reply<Result<SessionSnapshot, ConnectionError>>,
    },
    DisconnectFinished {
        session_id: u64,
        result: Result<(), EngineError>,
        reply: Reply<Result<(), DisconnectError>>,
    },
    DeviceFinished {
        ticket: Ticket,
        result: Result<Option<LocalPublication>, EngineError>,
        reply: Reply<Result<(), TrackError>>,
    },
    UnpublishAllFinished {
        result: Result<(), EngineError>,
        reply: Reply<()>,
    },
    Notification(RoomNotification),
}

impl From<RoomNotification> for Internal {
    fn from(notification: RoomNotification) -> Self {
        Self::Notification(notification)
    }
}

/// Configures and starts a [`RoomSession`].
pub struct RoomSessionBuilder {
    engine: Arc<dyn MediaEngine>,
    capabilities: Capabilities,
    idle: Arc<dyn IdleInhibitor>,
}

impl RoomSessionBuilder {
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn idle_inhibitor(mut self, idle: Arc<dyn IdleInhibitor>) -> Self {
        self.idle = idle;
        self
    }

    /// Spawn the controller task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> RoomSession {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let emitter = EventEmitter::new();

        let controller = SessionController {
            engine: self.engine,
            internal_tx,
            snapshots: snapshot_tx,
            emitter: emitter.clone(),
            idle: self.idle,
            snapshot: SessionSnapshot::default(),
            token: String::new(),
            tracks: TrackPublicationCoordinator::new(self.capabilities),
            dispatcher: None,
            session_id: 0,
        };
        tokio::spawn(controller.run(command_rx, internal_rx));

        RoomSession {
            commands: command_tx,
            snapshots: snapshot_rx,
            emitter,
        }
    }
}

/// Cloneable handle to a session controller.
///
/// The controller stops once every handle is dropped.
#[derive(Clone)]
pub struct RoomSession {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    emitter: EventEmitter,
}

impl RoomSession {
    pub fn builder(engine: Arc<dyn MediaEngine>) -> RoomSessionBuilder {
        RoomSessionBuilder {
            engine,
            capabilities: Capabilities::default(),
            idle: Arc::new(NoopIdleInhibitor),
        }
    }

    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self::builder(engine).spawn()
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn request<R>(&self, make: impl FnOnce(Reply<R>) -> Command) -> Option<R> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(make(reply)).await.ok()?;
        rx.await.ok()
    }

    pub async fn connect(
        &self,
        url: &str,
        token: &str,
        options: SessionOptions,
    ) -> Result<SessionSnapshot, ConnectionError> {
        self.request(|reply| Command::Connect {
            url: url.to_string(),
            token: token.to_string(),
            options,
            reply,
        })
        .await
        .unwrap_or(Err(ConnectionError::SessionClosed))
    }

    /// Connect with stored preferences, optionally replaying a history entry
    /// first. A successful connect is recorded in the history.
    pub async fn connect_with_preferences(
        &self,
        store: &PreferencesStore,
        entry: Option<&ConnectionHistoryEntry>,
    ) -> Result<SessionSnapshot, ConnectionError> {
        if let Some(entry) = entry {
            store.set_url(&entry.url);
            store.set_token(&entry.token);
        }
        let preferences = store.get();
        let snapshot = self
            .connect(
                &preferences.url,
                &preferences.token,
                preferences.session_options(),
            )
            .await?;
        store.record_connection(&preferences.url, &preferences.token);
        Ok(snapshot)
    }

    /// Disconnecting an already disconnected session succeeds.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        self.request(|reply| Command::Disconnect { reply })
            .await
            .unwrap_or(Err(DisconnectError::SessionClosed))
    }

    /// Flip one device on or off.
    ///
    /// Resolves once the engine call completes. Engine failures do not
    /// surface here; they land in the device's `NotPublished` state.
    pub async fn toggle(&self, kind: DeviceKind) -> Result<(), TrackError> {
        self.toggle_with_source(kind, None).await
    }

    /// Screen share toggle for platforms that pick a capture source.
    pub async fn toggle_screen_share(
        &self,
        source: Option<CaptureSource>,
    ) -> Result<(), TrackError> {
        self.toggle_with_source(DeviceKind::ScreenShare, source)
            .await
    }

    async fn toggle_with_source(
        &self,
        kind: DeviceKind,
        source: Option<CaptureSource>,
    ) -> Result<(), TrackError> {
        self.request(|reply| Command::Toggle {
            kind,
            source,
            reply,
        })
        .await
        .unwrap_or(Err(TrackError::SessionClosed))
    }

    pub async fn switch_camera_facing(&self) -> Result<(), TrackError> {
        self.request(|reply| Command::SwitchCameraFacing { reply })
            .await
            .unwrap_or(Err(TrackError::SessionClosed))
    }

    /// Unpublish everything. All devices end up `NotPublished` whatever the
    /// engine reports.
    pub async fn unpublish_all(&self) {
        self.request(|reply| Command::UnpublishAll { reply }).await;
    }

    pub async fn set_subscribed(
        &self,
        participant_sid: &str,
        track_sid: &str,
        subscribed: bool,
    ) -> Result<(), TrackError> {
        self.request(|reply| Command::SetSubscribed {
            participant_sid: participant_sid.to_string(),
            track_sid: track_sid.to_string(),
            subscribed,
            reply,
        })
        .await
        .unwrap_or(Err(TrackError::SessionClosed))
    }

    /// Append a chat message locally and send it in the background.
    ///
    /// Returns the appended message, or `None` for empty text or when no
    /// session is live. Delivery failures are only logged.
    pub async fn send_message(&self, text: &str) -> Option<ChatMessage> {
        self.request(|reply| Command::SendMessage {
            text: text.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    pub async fn acknowledge_disconnect_reason(&self) {
        if self.commands.send(Command::AcknowledgeDisconnect).await.is_err() {
            tracing::debug!("acknowledge after controller stopped");
        }
    }
}

struct SessionController {
    engine: Arc<dyn MediaEngine>,
    internal_tx: mpsc::Sender<Internal>,
    snapshots: watch::Sender<SessionSnapshot>,
    emitter: EventEmitter,
    idle: Arc<dyn IdleInhibitor>,
    /// Working copy; `tracks` is folded in on publish.
    snapshot: SessionSnapshot,
    token: String,
    tracks: TrackPublicationCoordinator,
    dispatcher: Option<RoomEventDispatcher>,
    /// Bumped per connect so late events from an old room are ignored.
    session_id: u64,
}

impl SessionController {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<Internal>,
    ) {
        self.idle.set_idle_disabled(true);
        tracing::info!("session controller started");

        loop {
            tokio::select! {
                biased;
                Some(msg) = internal.recv() => self.handle_internal(msg),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.dispatcher = None;
        if self.snapshot.connection.is_live() {
            let engine = self.engine.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.disconnect().await {
                    tracing::warn!("disconnect on teardown failed: {e}");
                }
            });
        }
        self.idle.set_idle_disabled(false);
        tracing::info!("session controller stopped");
    }

    fn publish(&mut self) {
        self.snapshot.tracks = self.tracks.states();
        self.snapshots.send_replace(self.snapshot.clone());
    }

    fn set_connection(&mut self, state: ConnectionState) {
        tracing::info!(
            "connection state {:?} -> {state:?}",
            self.snapshot.connection
        );
        self.snapshot.connection = state.clone();
        self.publish();
        self.emitter
            .emit(SessionEvent::ConnectionStateChanged(state));
    }

    /// Publish and emit a change event for every device whose state moved.
    fn commit_tracks(&mut self, before: &TrackStates) {
        let after = self.tracks.states();
        self.publish();
        for kind in DeviceKind::ALL {
            let state = after.get(kind);
            if state != before.get(kind) {
                self.emitter.emit(SessionEvent::TrackPublishStateChanged {
                    kind,
                    state: state.clone(),
                });
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                url,
                token,
                options,
                reply,
            } => self.connect(url, token, options, reply),
            Command::Disconnect { reply } => self.disconnect(reply),
            Command::Toggle {
                kind,
                source,
                reply,
            } => self.toggle(kind, source, reply),
            Command::SwitchCameraFacing { reply } => self.switch_camera_facing(reply),
            Command::UnpublishAll { reply } => self.unpublish_all(reply),
            Command::SetSubscribed {
                participant_sid,
                track_sid,
                subscribed,
                reply,
            } => self.set_subscribed(participant_sid, track_sid, subscribed, reply),
            Command::SendMessage { text, reply } => {
                let _ = reply.send(self.send_message(&text));
            }
            Command::AcknowledgeDisconnect => {
                if self.snapshot.pending_disconnect_reason.take().is_some() {
                    self.publish();
                }
            }
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::ConnectFinished {
                session_id,
                result,
                reply,
            } => self.connect_finished(session_id, result, reply),
            Internal::DisconnectFinished {
                session_id,
                result,
                reply,
            } => {
                if session_id == self.session_id && !self.snapshot.connection.is_disconnected() {
                    self.enter_disconnected(DisconnectReason::UserInitiated);
                }
                if let Err(e) = &result {
                    tracing::warn!("engine disconnect failed: {e}");
                }
                let _ = reply.send(result.map_err(DisconnectError::from));
            }
            Internal::DeviceFinished {
                ticket,
                result,
                reply,
            } => {
                let before = self.tracks.states();
                match self.tracks.complete(ticket, result) {
                    Reconciled::Applied => self.commit_tracks(&before),
                    Reconciled::Superseded { orphan } => {
                        if let Some(orphan) = orphan {
                            self.cleanup_orphan(orphan);
                        }
                    }
                }
                let _ = reply.send(Ok(()));
            }
            Internal::UnpublishAllFinished { result, reply } => {
                if let Err(e) = result {
                    tracing::warn!("unpublish all failed: {e}");
                }
                let _ = reply.send(());
            }
            Internal::Notification(notification) => self.handle_notification(notification),
        }
    }

    fn connect(
        &mut self,
        url: String,
        token: String,
        options: SessionOptions,
        reply: Reply<Result<SessionSnapshot, ConnectionError>>,
    ) {
        let rejection = match self.snapshot.connection {
            ConnectionState::Disconnected(_) => validate_url(&url).err(),
            ConnectionState::Connecting => Some(ConnectionError::AlreadyConnecting),
            ConnectionState::Connected | ConnectionState::Reconnecting { .. } => {
                Some(ConnectionError::AlreadyConnected)
            }
            ConnectionState::Disconnecting => Some(ConnectionError::Disconnecting),
        };
        if let Some(err) = rejection {
            tracing::debug!("connect rejected: {err}");
            let _ = reply.send(Err(err));
            return;
        }

        let (connect_options, room_options) = engine_options(&options);
        self.session_id += 1;
        let session_id = self.session_id;

        let before = self.tracks.states();
        self.tracks.reset_all();
        self.snapshot = SessionSnapshot {
            url: Some(url.clone()),
            options,
            publish_only_id: connect_options.publish_only.clone(),
            ..SessionSnapshot::default()
        };
        self.token = token.clone();
        self.commit_tracks(&before);
        self.set_connection(ConnectionState::Connecting);

        let engine = self.engine.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = engine
                .connect(&url, &token, connect_options, room_options)
                .await;
            let _ = internal_tx
                .send(Internal::ConnectFinished {
                    session_id,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn connect_finished(
        &mut self,
        session_id: u64,
        result: Result<EngineSession, EngineError>,
        reply: Reply<Result<SessionSnapshot, ConnectionError>>,
    ) {
        if session_id != self.session_id || self.snapshot.connection != ConnectionState::Connecting
        {
            tracing::warn!("stale connect completion for session {session_id}");
            let _ = reply.send(Err(ConnectionError::Transport(
                "connect superseded".into(),
            )));
            return;
        }

        match result {
            Ok(session) => {
                tracing::info!(
                    "connected as {} ({})",
                    session.local.identity,
                    session.local.sid
                );
                self.snapshot.local = Some(session.local);
                self.snapshot.participants = session.participants;
                self.dispatcher = Some(RoomEventDispatcher::spawn(
                    session_id,
                    session.events,
                    self.internal_tx.clone(),
                ));
                self.set_connection(ConnectionState::Connected);
                let _ = reply.send(Ok(self.snapshot.clone()));
            }
            Err(e) => {
                tracing::warn!("connect failed: {e}");
                self.set_connection(ConnectionState::Disconnected(None));
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    fn disconnect(&mut self, reply: Reply<Result<(), DisconnectError>>) {
        match self.snapshot.connection {
            ConnectionState::Disconnected(_) | ConnectionState::Disconnecting => {
                let _ = reply.send(Ok(()));
                return;
            }
            ConnectionState::Connecting => {
                let _ = reply.send(Err(DisconnectError::ConnectInProgress));
                return;
            }
            ConnectionState::Connected | ConnectionState::Reconnecting { .. } => {}
        }

        self.set_connection(ConnectionState::Disconnecting);
        let session_id = self.session_id;
        let engine = self.engine.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = engine.disconnect().await;
            let _ = internal_tx
                .send(Internal::DisconnectFinished {
                    session_id,
                    result,
                    reply,
                })
                .await;
        });
    }

    /// Tear down room state and move to `Disconnected`.
    fn enter_disconnected(&mut self, reason: DisconnectReason) {
        let was_disconnected = self.snapshot.connection.is_disconnected();
        self.dispatcher = None;

        let before = self.tracks.states();
        self.tracks.reset_all();
        self.commit_tracks(&before);

        self.snapshot.participants.clear();
        self.snapshot.local = None;
        self.snapshot.last_disconnect_reason = Some(reason);
        let notify = !was_disconnected && !reason.is_user_initiated();
        if notify {
            self.snapshot.pending_disconnect_reason = Some(reason);
        }
        self.set_connection(ConnectionState::Disconnected(Some(reason)));
        if notify {
            self.emitter
                .emit(SessionEvent::DisconnectReasonAvailable(reason));
        }
    }

    fn toggle(
        &mut self,
        kind: DeviceKind,
        source: Option<CaptureSource>,
        reply: Reply<Result<(), TrackError>>,
    ) {
        if !self.snapshot.connection.is_live() {
            let _ = reply.send(Err(TrackError::NotConnected));
            return;
        }

        let before = self.tracks.states();
        let admitted = match self.tracks.begin_toggle(kind, source) {
            Ok(admitted) => admitted,
            Err(err) => {
                tracing::debug!("{kind} toggle rejected: {err}");
                let _ = reply.send(Err(err));
                return;
            }
        };
        self.commit_tracks(&before);

        let engine = self.engine.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match admitted.op {
                DeviceOp::SetEnabled(enabled) => engine.set_device_enabled(kind, enabled).await,
                DeviceOp::PublishSource(source) => {
                    engine.publish_screen_share(source).await.map(Some)
                }
                DeviceOp::Unpublish(publication) => {
                    engine.unpublish(&publication.sid).await.map(|()| None)
                }
            };
            let _ = internal_tx
                .send(Internal::DeviceFinished {
                    ticket: admitted.ticket,
                    result,
                    reply,
                })
                .await;
        });
    }

    /// Unpublish a track that finished publishing after its slot was reset.
    fn cleanup_orphan(&self, orphan: LocalPublication) {
        tracing::info!("unpublishing superseded track {}", orphan.sid);
        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.unpublish(&orphan.sid).await {
                tracing::warn!("cleanup of {} failed: {e}", orphan.sid);
            }
        });
    }

    fn switch_camera_facing(&mut self, reply: Reply<Result<(), TrackError>>) {
        if !self.snapshot.connection.is_live() {
            let _ = reply.send(Err(TrackError::NotConnected));
            return;
        }
        let publication = match self.tracks.camera_for_switch() {
            Ok(publication) => publication,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        let engine = self.engine.clone();
        tokio::spawn(async move {
            let result = engine
                .switch_camera_facing(&publication)
                .await
                .map_err(|e| match e {
                    EngineError::Unsupported(msg) => TrackError::State(msg),
                    other => TrackError::Engine(other),
                });
            let _ = reply.send(result);
        });
    }

    fn unpublish_all(&mut self, reply: Reply<()>) {
        // Reset before the engine call so toggles still in flight are
        // superseded and their late publications cleaned up.
        let before = self.tracks.states();
        self.tracks.reset_all();
        self.commit_tracks(&before);

        if !self.snapshot.connection.is_live() {
            let _ = reply.send(());
            return;
        }

        let engine = self.engine.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = engine.unpublish_all().await;
            let _ = internal_tx
                .send(Internal::UnpublishAllFinished { result, reply })
                .await;
        });
    }

    fn set_subscribed(
        &mut self,
        participant_sid: String,
        track_sid: String,
        subscribed: bool,
        reply: Reply<Result<(), TrackError>>,
    ) {
        if !self.snapshot.connection.is_live() {
            let _ = reply.send(Err(TrackError::NotConnected));
            return;
        }
        let known = self
            .snapshot
            .participant(&participant_sid)
            .and_then(|p| p.publication(&track_sid))
            .is_some();
        if !known {
            let _ = reply.send(Err(TrackError::State(format!(
                "unknown publication {track_sid} of {participant_sid}"
            ))));
            return;
        }

        let engine = self.engine.clone();
        tokio::spawn(async move {
            let result = engine
                .set_subscribed(&participant_sid, &track_sid, subscribed)
                .await
                .map_err(TrackError::from);
            let _ = reply.send(result);
        });
    }

    fn send_message(&mut self, text: &str) -> Option<ChatMessage> {
        if text.is_empty() {
            return None;
        }
        let Some(local) = &self.snapshot.local else {
            tracing::warn!("cannot send message: no local participant");
            return None;
        };

        let message = ChatMessage::new_local(&local.sid, &local.identity, text);
        Arc::make_mut(&mut self.snapshot.messages).push(message.clone());
        self.publish();
        self.emitter
            .emit(SessionEvent::MessageReceived(message.clone()));

        let payload = message.encode();
        let engine = self.engine.clone();
        let message_id = message.message_id.clone();
        tokio::spawn(async move {
            match engine.publish_data(payload).await {
                Ok(()) => tracing::debug!("sent message {message_id}"),
                Err(e) => tracing::warn!("failed to send message {message_id}: {e}"),
            }
        });
        Some(message)
    }

    fn handle_notification(&mut self, notification: RoomNotification) {
        if notification.session_id != self.session_id {
            tracing::debug!("dropping event from stale session {}", notification.session_id);
            return;
        }
        if self.snapshot.connection.is_disconnected() {
            tracing::debug!("dropping event after disconnect: {:?}", notification.event);
            return;
        }

        let disconnecting = self.snapshot.connection == ConnectionState::Disconnecting;
        match notification.event {
            EngineEvent::Reconnecting | EngineEvent::Reconnected if disconnecting => {
                tracing::debug!("ignoring reconnect event while disconnecting");
            }

            EngineEvent::Reconnecting => {
                let attempt = match self.snapshot.connection {
                    ConnectionState::Reconnecting { attempt } => attempt + 1,
                    _ => 1,
                };
                self.set_connection(ConnectionState::Reconnecting { attempt });
            }

            EngineEvent::Reconnected => {
                self.set_connection(ConnectionState::Connected);
            }

            EngineEvent::Disconnected { reason } => {
                // The engine may report its own reason for a close we asked for.
                let reason = if disconnecting {
                    DisconnectReason::UserInitiated
                } else {
                    reason
                };
                self.enter_disconnected(reason);
            }

            EngineEvent::ParticipantJoined(participant) => {
                if self.snapshot.participant(&participant.sid).is_none() {
                    let sid = participant.sid.clone();
                    self.snapshot.participants.push(participant);
                    self.publish();
                    self.emitter.emit(SessionEvent::ParticipantJoined(sid));
                }
            }

            EngineEvent::ParticipantLeft { participant_sid } => {
                self.snapshot
                    .participants
                    .retain(|p| p.sid != participant_sid);
                self.publish();
                self.emitter
                    .emit(SessionEvent::ParticipantLeft(participant_sid));
            }

            EngineEvent::TrackPublished {
                participant_sid,
                publication,
            } => {
                if let Some(p) = self.participant_mut(&participant_sid) {
                    p.publications.retain(|existing| existing.sid != publication.sid);
                    p.publications.push(publication);
                    self.publish();
                }
            }

            EngineEvent::TrackUnpublished {
                participant_sid,
                track_sid,
            } => {
                if let Some(p) = self.participant_mut(&participant_sid) {
                    p.publications.retain(|existing| existing.sid != track_sid);
                    self.publish();
                }
            }

            EngineEvent::SubscriptionChanged {
                participant_sid,
                track_sid,
                state,
            } => {
                let updated = self
                    .participant_mut(&participant_sid)
                    .and_then(|p| p.publication_mut(&track_sid))
                    .map(|publication| publication.subscription = state)
                    .is_some();
                if updated {
                    self.publish();
                    self.emitter.emit(SessionEvent::SubscriptionChanged {
                        participant_sid,
                        track_sid,
                        state,
                    });
                }
            }

            EngineEvent::TrackMuteChanged {
                participant_sid,
                track_sid,
                muted,
            } => {
                let is_local = self
                    .snapshot
                    .local
                    .as_ref()
                    .is_some_and(|l| l.sid == participant_sid);
                if is_local {
                    let before = self.tracks.states();
                    self.tracks.set_muted(&track_sid, muted);
                    self.commit_tracks(&before);
                } else if let Some(publication) = self
                    .participant_mut(&participant_sid)
                    .and_then(|p| p.publication_mut(&track_sid))
                {
                    publication.muted = muted;
                    self.publish();
                }
            }

            EngineEvent::LocalTrackUnpublished { track_sid } => {
                let before = self.tracks.states();
                if let Some(kind) = self.tracks.invalidate(&track_sid) {
                    tracing::info!("{kind} publication {track_sid} invalidated by engine");
                    self.commit_tracks(&before);
                }
            }

            EngineEvent::DataReceived {
                participant_sid,
                payload,
            } => match ChatMessage::decode(&payload) {
                Ok(message) => {
                    tracing::debug!(
                        "message {} from {}",
                        message.message_id,
                        message.sender_identity
                    );
                    Arc::make_mut(&mut self.snapshot.messages).push(message.clone());
                    self.publish();
                    self.emitter.emit(SessionEvent::MessageReceived(message));
                }
                Err(e) => {
                    tracing::warn!(
                        "dropping payload from {}: {e}",
                        participant_sid.as_deref().unwrap_or("server")
                    );
                }
            },
        }
    }

    fn participant_mut(&mut self, sid: &str) -> Option<&mut RemoteParticipant> {
        self.snapshot.participants.iter_mut().find(|p| p.sid == sid)
    }
}
