use crate::engine::CaptureSource;
use crate::errors::{EngineError, TrackError};
use crate::platform::Capabilities;
use crate::state::{DeviceKind, LocalPublication, TrackPublishState};

/// Identifies one admitted device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub kind: DeviceKind,
    id: u64,
}

/// Engine call the caller must issue for an admitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    SetEnabled(bool),
    PublishSource(CaptureSource),
    Unpublish(LocalPublication),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedOp {
    pub ticket: Ticket,
    pub op: DeviceOp,
}

/// What happened to a completed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    /// The slot was reset while the operation was in flight. A publication
    /// the engine created anyway is handed back so it can be cleaned up.
    Superseded { orphan: Option<LocalPublication> },
}

#[derive(Debug, Default)]
struct Slot {
    state: TrackPublishState,
    in_flight: Option<u64>,
}

/// Publish states for the three local devices, as seen by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackStates {
    pub camera: TrackPublishState,
    pub microphone: TrackPublishState,
    pub screen_share: TrackPublishState,
}

impl TrackStates {
    pub fn get(&self, kind: DeviceKind) -> &TrackPublishState {
        match kind {
            DeviceKind::Camera => &self.camera,
            DeviceKind::Microphone => &self.microphone,
            DeviceKind::ScreenShare => &self.screen_share,
        }
    }
}

/// Owns the local publish state for camera, microphone and screen share.
///
/// Admission and reconciliation only; the owner runs the engine calls and
/// feeds the results back through [`complete`](Self::complete). At most one
/// operation is admitted per device kind; a request while that kind is busy
/// is rejected, never queued.
#[derive(Debug)]
pub struct TrackPublicationCoordinator {
    camera: Slot,
    microphone: Slot,
    screen_share: Slot,
    next_ticket: u64,
    supports_source_selection: bool,
}

impl TrackPublicationCoordinator {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            camera: Slot::default(),
            microphone: Slot::default(),
            screen_share: Slot::default(),
            next_ticket: 0,
            supports_source_selection: capabilities.supports_source_selection,
        }
    }

    fn slot(&self, kind: DeviceKind) -> &Slot {
        match kind {
            DeviceKind::Camera => &self.camera,
            DeviceKind::Microphone => &self.microphone,
            DeviceKind::ScreenShare => &self.screen_share,
        }
    }

    fn slot_mut(&mut self, kind: DeviceKind) -> &mut Slot {
        match kind {
            DeviceKind::Camera => &mut self.camera,
            DeviceKind::Microphone => &mut self.microphone,
            DeviceKind::ScreenShare => &mut self.screen_share,
        }
    }

    pub fn state(&self, kind: DeviceKind) -> &TrackPublishState {
        &self.slot(kind).state
    }

    pub fn states(&self) -> TrackStates {
        TrackStates {
            camera: self.camera.state.clone(),
            microphone: self.microphone.state.clone(),
            screen_share: self.screen_share.state.clone(),
        }
    }

    /// Admit a toggle for `kind`, moving it to `Busy`.
    ///
    /// `source` is only consulted for screen share on platforms with source
    /// selection, where turning sharing on requires one.
    pub fn begin_toggle(
        &mut self,
        kind: DeviceKind,
        source: Option<CaptureSource>,
    ) -> Result<AdmittedOp, TrackError> {
        let current = &self.slot(kind).state;
        if current.is_busy() {
            return Err(TrackError::Busy(kind));
        }

        let op = match (kind, current) {
            (DeviceKind::ScreenShare, TrackPublishState::Published(publication))
                if self.supports_source_selection =>
            {
                DeviceOp::Unpublish(publication.clone())
            }
            (DeviceKind::ScreenShare, _) if self.supports_source_selection => match source {
                Some(source) => DeviceOp::PublishSource(source),
                None => {
                    return Err(TrackError::State(
                        "screen share requires a capture source".into(),
                    ));
                }
            },
            (_, state) => DeviceOp::SetEnabled(!state.is_published()),
        };

        let is_publishing = !matches!(op, DeviceOp::Unpublish(_) | DeviceOp::SetEnabled(false));
        let id = self.next_ticket;
        self.next_ticket += 1;

        let slot = self.slot_mut(kind);
        slot.state = TrackPublishState::Busy { is_publishing };
        slot.in_flight = Some(id);
        tracing::debug!("{kind} busy (publishing: {is_publishing})");

        Ok(AdmittedOp {
            ticket: Ticket { kind, id },
            op,
        })
    }

    /// Fold an engine result back into state.
    ///
    /// `Ok(Some(_))` means the device ended up published, `Ok(None)` that it
    /// ended up unpublished.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<Option<LocalPublication>, EngineError>,
    ) -> Reconciled {
        let slot = self.slot_mut(ticket.kind);
        if slot.in_flight != Some(ticket.id) {
            tracing::debug!("{} completion superseded", ticket.kind);
            return Reconciled::Superseded {
                orphan: result.ok().flatten(),
            };
        }

        slot.in_flight = None;
        slot.state = match result {
            Ok(Some(publication)) => TrackPublishState::Published(publication),
            Ok(None) => TrackPublishState::NotPublished(None),
            Err(err) => {
                tracing::warn!("{} operation failed: {err}", ticket.kind);
                TrackPublishState::NotPublished(Some(err))
            }
        };
        Reconciled::Applied
    }

    /// Force every device back to `NotPublished`, superseding in-flight work.
    pub fn reset_all(&mut self) {
        for kind in DeviceKind::ALL {
            let slot = self.slot_mut(kind);
            slot.state = TrackPublishState::NotPublished(None);
            slot.in_flight = None;
        }
    }

    /// Drop a publication the engine no longer knows about.
    pub fn invalidate(&mut self, track_sid: &str) -> Option<DeviceKind> {
        let kind = self.kind_for_sid(track_sid)?;
        self.slot_mut(kind).state = TrackPublishState::NotPublished(None);
        Some(kind)
    }

    pub fn set_muted(&mut self, track_sid: &str, muted: bool) -> Option<DeviceKind> {
        let kind = self.kind_for_sid(track_sid)?;
        if let TrackPublishState::Published(publication) = &mut self.slot_mut(kind).state {
            publication.muted = muted;
        }
        Some(kind)
    }

    fn kind_for_sid(&self, track_sid: &str) -> Option<DeviceKind> {
        DeviceKind::ALL.into_iter().find(|kind| {
            self.slot(*kind)
                .state
                .publication()
                .is_some_and(|p| p.sid == track_sid)
        })
    }

    /// The camera publication a facing switch applies to.
    pub fn camera_for_switch(&self) -> Result<LocalPublication, TrackError> {
        self.camera
            .state
            .publication()
            .cloned()
            .ok_or_else(|| TrackError::State("camera is not published".into()))
    }

    pub fn published(&self) -> Vec<LocalPublication> {
        DeviceKind::ALL
            .into_iter()
            .filter_map(|kind| self.slot(kind).state.publication().cloned())
            .collect()
    }
}
