//! Job lifecycle controller.
//!
//! Owns the single-flight guard, invokes the helper, and translates its
//! event stream into log publishes and state transitions. The guard and the
//! per-job "resolved" flag are the only atomics; neither the active-job
//! mutex nor the hub's replay lock is ever held across a call into the
//! helper or into observer delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::helper::Helper;
use crate::hub::LogHub;
use crate::model::{HelperEvent, JobOutcome, Status};
use crate::state::StateChannel;

type OutcomeSender = oneshot::Sender<Result<JobOutcome, Error>>;

/// Resolves when the job reaches a terminal state. Dropping the handle does
/// not affect the job: the single-flight guard is released on the terminal
/// event regardless of whether anyone is still waiting.
#[derive(Debug)]
pub struct JobHandle {
    rx: oneshot::Receiver<Result<JobOutcome, Error>>,
}

impl JobHandle {
    pub async fn wait(self) -> Result<JobOutcome, Error> {
        self.rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// Shared record for the in-flight job. Cloned into the pump task; whichever
/// of `stop()` and the terminal event wins the `resolved` compare-and-set
/// delivers the outcome, the loser no-ops.
#[derive(Clone)]
struct ActiveJob {
    resolved: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<OutcomeSender>>>,
}

impl ActiveJob {
    /// Claim the right to resolve this job. At most one caller ever wins.
    fn try_resolve(&self) -> Option<OutcomeSender> {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.outcome.lock().expect("outcome slot poisoned").take()
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

pub(crate) struct JobController {
    /// Single-flight guard: true while a job holds the slot.
    running: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveJob>>>,
    hub: Arc<LogHub>,
    state: Arc<StateChannel>,
}

impl JobController {
    pub(crate) fn new(hub: Arc<LogHub>, state: Arc<StateChannel>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(None)),
            hub,
            state,
        }
    }

    /// Acquire the single-flight slot and launch the helper. Fails with
    /// [`Error::AlreadyRunning`] without touching any shared state if a job
    /// is in flight; the check-and-set is a single atomic operation so two
    /// racing callers can never both pass.
    pub(crate) fn start(
        &self,
        helper: &Arc<dyn Helper>,
        args: Vec<String>,
    ) -> Result<JobHandle, Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let job = ActiveJob {
            resolved: Arc::new(AtomicBool::new(false)),
            outcome: Arc::new(Mutex::new(Some(outcome_tx))),
        };
        *self.active.lock().expect("active job lock poisoned") = Some(job.clone());

        self.state.set_status(Status::Running);
        info!(?args, "helper job started");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        helper.invoke(args, event_tx);
        self.spawn_pump(job, event_rx);

        Ok(JobHandle { rx: outcome_rx })
    }

    /// Stop the in-flight job, if any. Signals the helper, resolves the
    /// handle with [`Error::Cancelled`], releases the slot, and returns
    /// `true`. Returns `false` as a no-op when nothing is running or the job
    /// just resolved on its own.
    pub(crate) fn stop(&self, helper: Option<&Arc<dyn Helper>>) -> bool {
        let job = {
            let active = self.active.lock().expect("active job lock poisoned");
            match active.as_ref() {
                Some(job) => job.clone(),
                None => return false,
            }
        };
        let Some(tx) = job.try_resolve() else {
            // Lost the race against the terminal event or a concurrent stop.
            return false;
        };

        // Signal outside any lock; the helper's shutdown is asynchronous and
        // may call back into us.
        if let Some(helper) = helper {
            helper.request_stop();
        }
        info!("helper job stopped by user");
        self.hub.publish("Execution stopped by user");

        let _ = tx.send(Err(Error::Cancelled));
        self.release(Status::Stopped);
        true
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Translate helper events until the stream closes. Runs as its own
    /// task so neither the caller of `start` nor the helper's emitting
    /// context ever blocks on observers.
    fn spawn_pump(&self, job: ActiveJob, mut events: mpsc::UnboundedReceiver<HelperEvent>) {
        let hub = self.hub.clone();
        let state = self.state.clone();
        let running = self.running.clone();
        let active = self.active.clone();

        tokio::spawn(async move {
            let mut saw_terminal = false;
            while let Some(event) = events.recv().await {
                match event {
                    HelperEvent::Log(line) => {
                        if job.is_resolved() {
                            // Late callback racing a stop; never attribute it
                            // to the next job.
                            debug!(%line, "discarding log line after resolution");
                            continue;
                        }
                        hub.publish(line);
                    }
                    HelperEvent::Result { success, payload } => {
                        saw_terminal = true;
                        match job.try_resolve() {
                            Some(tx) => {
                                let (status, outcome) = if success {
                                    (Status::Completed, Ok(finished(payload)))
                                } else {
                                    (
                                        Status::Failed,
                                        Err(Error::Helper { message: payload }),
                                    )
                                };
                                info!(?status, "helper job finished");
                                let _ = tx.send(outcome);
                                release(&running, &active, &state, status);
                            }
                            None => {
                                debug!("discarding terminal event after resolution");
                            }
                        }
                        break;
                    }
                }
            }

            // A helper that drops its sender without a terminal event must
            // not leak the single-flight slot.
            if !saw_terminal {
                if let Some(tx) = job.try_resolve() {
                    warn!("helper event stream closed without a terminal event");
                    let _ = tx.send(Err(Error::Helper {
                        message: "helper stream closed unexpectedly".to_string(),
                    }));
                    release(&running, &active, &state, Status::Failed);
                }
            }
        });
    }

    fn release(&self, status: Status) {
        release(&self.running, &self.active, &self.state, status);
    }
}

/// Tear down the in-flight record and free the slot. Status is published
/// before the guard drops so a racing `start` can only ever append a fresh
/// `Running` after the terminal transition, never interleave with it.
fn release(
    running: &AtomicBool,
    active: &Mutex<Option<ActiveJob>>,
    state: &StateChannel,
    status: Status,
) {
    *active.lock().expect("active job lock poisoned") = None;
    state.set_status(status);
    running.store(false, Ordering::SeqCst);
}

fn finished(output: String) -> JobOutcome {
    JobOutcome {
        success: true,
        output,
        finished_at_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
    }
}
