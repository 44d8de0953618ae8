//! Observable run state.
//!
//! A small watch channel holding the latest `{running, status}` pair.
//! Updated only by the job controller; any number of observers read it
//! reactively and always see transitions as a monotonic sequence.

use serde::Serialize;
use tokio::sync::watch;

use crate::model::Status;

/// The mutable portion of a state snapshot. Log history is projected from
/// the hub at read time, not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub running: bool,
    pub status: Status,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            running: false,
            status: Status::Disconnected,
        }
    }
}

#[derive(Debug)]
pub struct StateChannel {
    tx: watch::Sender<RunState>,
}

impl StateChannel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::default());
        Self { tx }
    }

    /// Latest state, synchronously and without blocking.
    pub fn current(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Register a state observer. Dropping the receiver detaches it.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Apply a status transition. `running` is kept in lockstep with the
    /// status so observers can never see the two disagree.
    pub fn set_status(&self, status: Status) {
        self.tx.send_modify(|s| {
            s.status = status;
            s.running = matches!(status, Status::Running);
        });
    }

    /// Disconnected -> Ready, once the helper collaborator is available.
    /// Any other current status is left untouched.
    pub fn mark_ready(&self) {
        self.tx.send_modify(|s| {
            if s.status == Status::Disconnected {
                s.status = Status::Ready;
            }
        });
    }
}

impl Default for StateChannel {
    fn default() -> Self {
        Self::new()
    }
}
