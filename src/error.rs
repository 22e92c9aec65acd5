//! Crate-level error type.
//!
//! Each layer of the crate defines its own error enum next to the code that
//! raises it. This module aggregates them into a single [`Error`] for callers
//! that drive several layers at once.

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregated error for all orchestration layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure (unreachable host, rejected auth).
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),

    /// Command execution failure.
    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),

    /// Service lifecycle failure.
    #[error(transparent)]
    Service(#[from] crate::service::ServiceError),

    /// HTTP API failure.
    #[error(transparent)]
    Api(#[from] crate::api::ApiError),

    /// Task graph failure or polling timeout.
    #[error(transparent)]
    Tracker(#[from] crate::api::tasks::TrackerError),

    /// Compatibility rule lookup failure.
    #[error(transparent)]
    Selector(#[from] crate::selectors::SelectorError),
}

impl Error {
    /// Name of the component that raised this error.
    pub fn component(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Exec(_) => "exec",
            Error::Service(_) => "service",
            Error::Api(_) => "api",
            Error::Tracker(_) => "tracker",
            Error::Selector(_) => "selector",
        }
    }
}
