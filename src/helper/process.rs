//! Process-backed helper implementation.
//!
//! Spawns the configured executable, line-streams its stdout/stderr as log
//! events, and synthesizes the terminal result from the exit status. A stop
//! request kills the child; the kill is best-effort and the final events of
//! a dying process may still trickle in afterwards.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Helper;
use crate::model::HelperEvent;

pub struct ProcessHelper {
    program: PathBuf,
    cancel: Mutex<CancellationToken>,
}

impl ProcessHelper {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }
}

impl Helper for ProcessHelper {
    fn invoke(&self, args: Vec<String>, events: mpsc::UnboundedSender<HelperEvent>) {
        // Fresh token per invocation so a stale stop request cannot cancel
        // the next job.
        let token = CancellationToken::new();
        *self.cancel.lock().expect("cancel token lock poisoned") = token.clone();

        let program = self.program.clone();
        tokio::spawn(async move {
            if let Err(e) = run_child(program, args, events.clone(), token).await {
                let _ = events.send(HelperEvent::Result {
                    success: false,
                    payload: format!("{e:#}"),
                });
            }
        });
    }

    fn request_stop(&self) {
        self.cancel
            .lock()
            .expect("cancel token lock poisoned")
            .cancel();
    }
}

/// Forward non-empty trimmed lines from a child pipe into the event stream.
/// Returns the last forwarded line, which for natmap's stdout is the public
/// mapping it prints on success.
fn pump_lines<R>(
    reader: R,
    events: mpsc::UnboundedSender<HelperEvent>,
    last_line: Option<Arc<Mutex<Option<String>>>>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(slot) = &last_line {
                *slot.lock().expect("last line lock poisoned") = Some(line.to_string());
            }
            if events.send(HelperEvent::Log(line.to_string())).is_err() {
                break;
            }
        }
    })
}

async fn run_child(
    program: PathBuf,
    args: Vec<String>,
    events: mpsc::UnboundedSender<HelperEvent>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    debug!(program = %program.display(), ?args, "spawning helper");

    let mut child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", program.display()))?;

    let last_stdout = Arc::new(Mutex::new(None));
    let out_task = child
        .stdout
        .take()
        .map(|out| pump_lines(out, events.clone(), Some(last_stdout.clone())));
    let err_task = child
        .stderr
        .take()
        .map(|err| pump_lines(err, events.clone(), None));

    let mut stopped = false;
    let status = tokio::select! {
        status = child.wait() => status?,
        _ = token.cancelled() => {
            stopped = true;
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill helper process");
            }
            child.wait().await?
        }
    };

    // Let both pipes drain to EOF so no log line is lost before the
    // terminal event.
    if let Some(t) = out_task {
        let _ = t.await;
    }
    if let Some(t) = err_task {
        let _ = t.await;
    }

    let success = status.success() && !stopped;
    let payload = if stopped {
        "helper stopped".to_string()
    } else if success {
        last_stdout
            .lock()
            .expect("last line lock poisoned")
            .clone()
            .unwrap_or_default()
    } else {
        format!("helper exited with status {status}")
    };
    debug!(%success, %payload, "helper finished");

    let _ = events.send(HelperEvent::Result { success, payload });
    Ok(())
}
