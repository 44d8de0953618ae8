//! Error types for the supervisor library.
//!
//! All errors are local to a single `start` attempt; there is no automatic
//! retry. Guard violations and the not-initialized case are reported
//! synchronously to the caller and never mutate shared state. Helper-reported
//! failures surface only through the `Failed` transition and the resolved
//! job handle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No helper has been connected to the supervisor yet.
    #[error("helper is not initialized")]
    NotInitialized,

    /// A job is already in flight; invocations are single-flight and
    /// concurrent requests are rejected rather than queued.
    #[error("helper is already running")]
    AlreadyRunning,

    /// The helper reported a failure.
    #[error("helper failed: {message}")]
    Helper { message: String },

    /// The job was stopped by the user. Not a failure.
    #[error("job was stopped before completion")]
    Cancelled,

    /// The job's resolution channel went away before a terminal event.
    #[error("job resolution channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
