/// What the host platform can do, decided at runtime instead of per target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Screen sharing needs an explicit capture source picked by the user
    /// (desktop). Mobile platforms pick the source themselves.
    pub supports_source_selection: bool,
}

/// Keeps the device awake while a session controller is alive.
pub trait IdleInhibitor: Send + Sync {
    fn set_idle_disabled(&self, disabled: bool);
}

/// For hosts without a screen-sleep concept (tests, headless).
pub struct NoopIdleInhibitor;

impl IdleInhibitor for NoopIdleInhibitor {
    fn set_idle_disabled(&self, _disabled: bool) {}
}
