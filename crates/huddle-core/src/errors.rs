use thiserror::Error;

use crate::state::DeviceKind;

/// Opaque failure reported by the underlying media engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("engine session closed")]
    Closed,
    #[error("engine error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("already connecting")]
    AlreadyConnecting,
    #[error("disconnect in progress")]
    Disconnecting,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("session controller has stopped")]
    SessionClosed,
}

impl From<EngineError> for ConnectionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Auth(msg) => Self::AuthRejected(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("cannot disconnect while a connect is in progress")]
    ConnectInProgress,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("session controller has stopped")]
    SessionClosed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackError {
    /// Operation is illegal for the current state or platform capability.
    #[error("invalid state: {0}")]
    State(String),
    #[error("{0} operation already in flight")]
    Busy(DeviceKind),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("session controller has stopped")]
    SessionClosed,
}

/// Malformed inbound chat payload.
#[derive(Debug, Error)]
#[error("malformed chat payload: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);
