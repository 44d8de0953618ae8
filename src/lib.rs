//! Single-flight supervisor for an external NAT traversal helper.
//!
//! Wraps a black-box helper executable (natmap by default) behind an
//! orchestration layer that enforces at-most-one concurrent invocation,
//! streams the helper's output to any number of live observers with a
//! bounded replay for late joiners, supports cooperative cancellation, and
//! republishes aggregate state to transient subscribers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use natmap_supervisor::{ProcessHelper, Supervisor, SupervisorConfig};
//!
//! # async fn demo() -> Result<(), natmap_supervisor::Error> {
//! let config = SupervisorConfig::default();
//! let supervisor = Supervisor::with_helper(
//!     &config,
//!     Arc::new(ProcessHelper::new(&config.helper_program)),
//! );
//!
//! let handle = supervisor.start(vec!["-u".into(), "-b".into(), "55555".into()])?;
//! let mut logs = supervisor.subscribe_logs();
//! tokio::spawn(async move {
//!     while let Ok(event) = logs.live.recv().await {
//!         println!("{}", event.line);
//!     }
//! });
//! let outcome = handle.wait().await?;
//! println!("mapped: {}", outcome.output);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod helper;
pub mod hub;
pub mod model;
pub mod orchestrator;
pub mod state;

pub use error::Error;
pub use helper::{Helper, ProcessHelper};
pub use hub::{LogHub, LogSubscription};
pub use model::{HelperEvent, JobOutcome, LogEvent, StateSnapshot, Status, SupervisorConfig};
pub use orchestrator::{JobHandle, Supervisor};
pub use state::RunState;
