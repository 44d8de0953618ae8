//! Execution orchestration.
//!
//! This module owns job lifecycle control (start/stop), the single-flight
//! guarantee, and the republishing of aggregate state to observers. Hosts
//! (CLI, service, UI binding) call into [`Supervisor`] and never talk to the
//! helper directly.

mod controller;

pub use controller::JobHandle;

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;

use crate::error::Error;
use crate::helper::Helper;
use crate::hub::{LogHub, LogSubscription};
use crate::model::{StateSnapshot, SupervisorConfig};
use crate::state::{RunState, StateChannel};

use controller::JobController;

/// Public entry point combining the controller, state channel, and log hub.
///
/// Cheap to clone; every clone shares the same underlying orchestrator, so
/// its lifetime is decoupled from any single observer's. UI layers may attach
/// and detach any number of times without losing in-flight job state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    controller: JobController,
    hub: Arc<LogHub>,
    state: Arc<StateChannel>,
    helper: Mutex<Option<Arc<dyn Helper>>>,
}

impl Supervisor {
    /// Create a supervisor with no helper connected. `start` fails with
    /// [`Error::NotInitialized`] until [`Supervisor::connect`] is called.
    pub fn new(config: &SupervisorConfig) -> Self {
        let hub = Arc::new(LogHub::new(config.replay_capacity));
        let state = Arc::new(StateChannel::new());
        Self {
            inner: Arc::new(Inner {
                controller: JobController::new(hub.clone(), state.clone()),
                hub,
                state,
                helper: Mutex::new(None),
            }),
        }
    }

    /// Create a supervisor with the helper already connected.
    pub fn with_helper(config: &SupervisorConfig, helper: Arc<dyn Helper>) -> Self {
        let supervisor = Self::new(config);
        supervisor.connect(helper);
        supervisor
    }

    /// Connect the helper collaborator. Transitions Disconnected -> Ready;
    /// a later reconnect swaps the helper without disturbing the status.
    pub fn connect(&self, helper: Arc<dyn Helper>) {
        *self.inner.helper.lock().expect("helper slot poisoned") = Some(helper);
        self.inner.state.mark_ready();
        self.inner.hub.publish("Helper connected");
        info!("helper connected");
    }

    /// Start a job with the given helper arguments. Returns a handle that
    /// resolves when the job reaches a terminal state. The call itself does
    /// not block beyond guard acquisition.
    pub fn start(&self, args: Vec<String>) -> Result<JobHandle, Error> {
        let helper = self
            .inner
            .helper
            .lock()
            .expect("helper slot poisoned")
            .clone()
            .ok_or(Error::NotInitialized)?;
        self.inner.controller.start(&helper, args)
    }

    /// Stop the in-flight job. `true` if a job was stopped, `false` as an
    /// idempotent no-op when nothing is running.
    pub fn stop(&self) -> bool {
        let helper = self
            .inner
            .helper
            .lock()
            .expect("helper slot poisoned")
            .clone();
        self.inner.controller.stop(helper.as_ref())
    }

    pub fn is_running(&self) -> bool {
        self.inner.controller.is_running()
    }

    pub fn connected(&self) -> bool {
        self.inner
            .helper
            .lock()
            .expect("helper slot poisoned")
            .is_some()
    }

    /// Latest snapshot: run state plus the accumulated log history, composed
    /// on read.
    pub fn current_state(&self) -> StateSnapshot {
        let run = self.inner.state.current();
        StateSnapshot {
            running: run.running,
            status: run.status,
            log_history: self.inner.hub.history(),
        }
    }

    /// Attach a log observer; the subscription replays recent history first.
    pub fn subscribe_logs(&self) -> LogSubscription {
        self.inner.hub.subscribe()
    }

    /// Attach a state observer.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HelperEvent, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Test helper driven manually from the test body: `invoke` parks the
    /// event sender for the test to feed, `request_stop` only counts calls.
    #[derive(Default)]
    struct ManualHelper {
        sender: Mutex<Option<mpsc::UnboundedSender<HelperEvent>>>,
        stop_calls: AtomicUsize,
    }

    impl ManualHelper {
        fn take_sender(&self) -> mpsc::UnboundedSender<HelperEvent> {
            self.sender
                .lock()
                .unwrap()
                .take()
                .expect("invoke was not called")
        }

        fn stop_calls(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }
    }

    impl Helper for ManualHelper {
        fn invoke(&self, _args: Vec<String>, events: mpsc::UnboundedSender<HelperEvent>) {
            *self.sender.lock().unwrap() = Some(events);
        }

        fn request_stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn supervisor_with_manual() -> (Supervisor, Arc<ManualHelper>) {
        let helper = Arc::new(ManualHelper::default());
        let supervisor =
            Supervisor::with_helper(&SupervisorConfig::default(), helper.clone());
        (supervisor, helper)
    }

    /// Wait for a state observer to report the given status.
    async fn await_status(rx: &mut watch::Receiver<RunState>, status: Status) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if rx.borrow_and_update().status == status {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("status never became {status:?}"));
    }

    #[tokio::test]
    async fn start_on_disconnected_supervisor_fails() {
        let supervisor = Supervisor::new(&SupervisorConfig::default());
        let err = supervisor.start(vec!["-u".into()]).unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert_eq!(supervisor.current_state().status, Status::Disconnected);
    }

    #[tokio::test]
    async fn connect_transitions_to_ready() {
        let (supervisor, _helper) = supervisor_with_manual();
        let snap = supervisor.current_state();
        assert_eq!(snap.status, Status::Ready);
        assert!(!snap.running);
        assert!(supervisor.connected());
    }

    #[tokio::test]
    async fn successful_run_reaches_completed_with_ordered_log() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor
            .start(vec!["-u".into(), "-s".into(), "turn.example.com".into(), "-b".into(), "55555".into()])
            .unwrap();
        await_status(&mut state_rx, Status::Running).await;
        assert!(supervisor.is_running());

        let tx = helper.take_sender();
        tx.send(HelperEvent::Log("binding...".into())).unwrap();
        tx.send(HelperEvent::Log("bound 1.2.3.4:55555".into())).unwrap();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "1.2.3.4:55555".into(),
        })
        .unwrap();
        drop(tx);

        let outcome = handle.wait().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "1.2.3.4:55555");

        await_status(&mut state_rx, Status::Completed).await;
        let snap = supervisor.current_state();
        assert!(!snap.running);
        // "Helper connected" precedes the job's own lines.
        assert_eq!(
            snap.log_history,
            vec!["Helper connected", "binding...", "bound 1.2.3.4:55555"]
        );
    }

    #[tokio::test]
    async fn job_handle_is_inspectable() {
        let (supervisor, helper) = supervisor_with_manual();
        let handle = supervisor.start(vec![]).unwrap();
        assert!(format!("{handle:?}").contains("JobHandle"));

        let tx = helper.take_sender();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "done".into(),
        })
        .unwrap();
        drop(tx);
        assert!(handle.wait().await.unwrap().success);
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_disturbing_the_first() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec!["-u".into()]).unwrap();
        await_status(&mut state_rx, Status::Running).await;

        let err = supervisor.start(vec!["-u".into()]).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));
        assert_eq!(supervisor.current_state().status, Status::Running);

        // First job is unaffected and still completes.
        let tx = helper.take_sender();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "done".into(),
        })
        .unwrap();
        drop(tx);
        assert!(handle.wait().await.unwrap().success);
    }

    #[tokio::test]
    async fn slot_is_free_again_after_terminal_event() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec![]).unwrap();
        let tx = helper.take_sender();
        tx.send(HelperEvent::Result {
            success: false,
            payload: "bind failed".into(),
        })
        .unwrap();
        drop(tx);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, Error::Helper { .. }));
        await_status(&mut state_rx, Status::Failed).await;

        // Failed -> Running on the next accepted start.
        let handle = supervisor.start(vec![]).unwrap();
        await_status(&mut state_rx, Status::Running).await;
        let tx = helper.take_sender();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "ok".into(),
        })
        .unwrap();
        drop(tx);
        assert!(handle.wait().await.unwrap().success);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_signals_the_helper() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec![]).unwrap();
        await_status(&mut state_rx, Status::Running).await;

        assert!(supervisor.stop());
        assert!(!supervisor.stop());
        assert_eq!(helper.stop_calls(), 1);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        await_status(&mut state_rx, Status::Stopped).await;
        assert!(!supervisor.is_running());
        assert!(supervisor
            .current_state()
            .log_history
            .contains(&"Execution stopped by user".to_string()));
    }

    #[tokio::test]
    async fn stop_on_idle_supervisor_is_a_noop() {
        let (supervisor, helper) = supervisor_with_manual();
        assert!(!supervisor.stop());
        assert_eq!(helper.stop_calls(), 0);
        assert_eq!(supervisor.current_state().status, Status::Ready);
    }

    #[tokio::test]
    async fn late_events_after_stop_are_discarded() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec![]).unwrap();
        await_status(&mut state_rx, Status::Running).await;
        let tx = helper.take_sender();

        assert!(supervisor.stop());
        assert!(matches!(handle.wait().await, Err(Error::Cancelled)));
        await_status(&mut state_rx, Status::Stopped).await;
        let history_before = supervisor.current_state().log_history;

        // The helper races a final line and its own terminal event past the
        // stop; both must be dropped without corrupting state.
        tx.send(HelperEvent::Log("late line".into())).unwrap();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "too late".into(),
        })
        .unwrap();
        drop(tx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = supervisor.current_state();
        assert_eq!(snap.status, Status::Stopped);
        assert_eq!(snap.log_history, history_before);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn terminal_event_beats_stop_exactly_once() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec![]).unwrap();
        await_status(&mut state_rx, Status::Running).await;

        let tx = helper.take_sender();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "done".into(),
        })
        .unwrap();
        drop(tx);
        assert!(handle.wait().await.unwrap().success);
        await_status(&mut state_rx, Status::Completed).await;

        // The stop arrives just after resolution: no second transition.
        assert!(!supervisor.stop());
        assert_eq!(helper.stop_calls(), 0);
        assert_eq!(supervisor.current_state().status, Status::Completed);
    }

    #[tokio::test]
    async fn guard_is_released_even_when_handle_is_dropped() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec![]).unwrap();
        drop(handle);

        let tx = helper.take_sender();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "done".into(),
        })
        .unwrap();
        drop(tx);

        await_status(&mut state_rx, Status::Completed).await;
        assert!(!supervisor.is_running());
        assert!(supervisor.start(vec![]).is_ok());
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_fails_the_job() {
        let (supervisor, helper) = supervisor_with_manual();
        let mut state_rx = supervisor.subscribe_state();

        let handle = supervisor.start(vec![]).unwrap();
        await_status(&mut state_rx, Status::Running).await;

        // Helper dies without reporting.
        drop(helper.take_sender());

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, Error::Helper { .. }));
        await_status(&mut state_rx, Status::Failed).await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn clones_share_one_orchestrator() {
        let (supervisor, helper) = supervisor_with_manual();
        let attached_ui = supervisor.clone();
        let mut state_rx = attached_ui.subscribe_state();

        let _handle = supervisor.start(vec![]).unwrap();
        await_status(&mut state_rx, Status::Running).await;
        assert!(attached_ui.is_running());

        // The first UI detaches; in-flight state survives for the next one.
        drop(attached_ui);
        drop(state_rx);
        let tx = helper.take_sender();
        tx.send(HelperEvent::Log("still here".into())).unwrap();
        tx.send(HelperEvent::Result {
            success: true,
            payload: "ok".into(),
        })
        .unwrap();
        drop(tx);

        let reattached = supervisor.clone();
        let mut rx = reattached.subscribe_state();
        await_status(&mut rx, Status::Completed).await;
        assert!(reattached
            .current_state()
            .log_history
            .contains(&"still here".to_string()));
    }
}
