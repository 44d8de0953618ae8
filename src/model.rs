use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a supervisor instance, built from CLI arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Path or name of the helper executable.
    pub helper_program: PathBuf,
    /// How many recent log lines are replayed to late-joining observers.
    pub replay_capacity: usize,
    /// How long the host waits for the helper to wind down after a stop.
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            helper_program: PathBuf::from("natmap"),
            replay_capacity: 100,
            stop_grace: Duration::from_secs(3),
        }
    }
}

/// Connection and progress status published to state observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// No helper connected yet.
    Disconnected,
    /// Helper connected, nothing running.
    Ready,
    /// A job is in flight.
    Running,
    /// Last job finished successfully.
    Completed,
    /// Last job reported a failure.
    Failed,
    /// Last job was stopped by the user.
    Stopped,
}

/// Events produced by a helper invocation: zero or more `Log` lines followed
/// by exactly one `Result`, after which the event stream closes.
#[derive(Debug, Clone)]
pub enum HelperEvent {
    Log(String),
    Result {
        success: bool,
        /// Helper output on success, error message on failure.
        payload: String,
    },
}

/// A single published log line. `seq` is a monotonic publish counter; lines
/// are delivered to every observer in `seq` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub seq: u64,
    pub line: String,
}

/// Terminal outcome of a successful helper job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    /// The helper's reported output, e.g. the public mapping natmap printed.
    pub output: String,
    pub finished_at_utc: String,
}

/// Point-in-time projection of the current job plus accumulated log history.
/// Derived on read, never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub running: bool,
    pub status: Status,
    pub log_history: Vec<String>,
}
