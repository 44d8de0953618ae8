//! Boundary to the external network-traversal helper.
//!
//! The helper is a black box invoked with a list of string arguments. Its
//! callback-style native contract is re-expressed here as a cancellable
//! operation that feeds a channel of tagged events: zero or more
//! [`HelperEvent::Log`] lines followed by exactly one [`HelperEvent::Result`],
//! after which the sender is dropped and the stream closes.

mod process;

pub use process::ProcessHelper;

use tokio::sync::mpsc;

use crate::model::HelperEvent;

pub trait Helper: Send + Sync + 'static {
    /// Launch the helper with `args`. Must not block the caller; the
    /// invocation runs in its own execution context and reports through
    /// `events`.
    fn invoke(&self, args: Vec<String>, events: mpsc::UnboundedSender<HelperEvent>);

    /// Best-effort asynchronous cancellation signal. No acknowledgement is
    /// guaranteed; the helper's own shutdown may complete in the background.
    fn request_stop(&self);
}
