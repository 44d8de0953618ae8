use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use natmap_supervisor::{
    Error, ProcessHelper, Supervisor, SupervisorConfig,
};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "natmap-supervisor",
    version,
    about = "Run the natmap NAT traversal helper under a single-flight supervisor"
)]
pub struct Cli {
    /// Path or name of the helper executable
    #[arg(long, default_value = "natmap")]
    pub helper: std::path::PathBuf,

    /// Print the terminal result as JSON instead of a text line
    #[arg(long)]
    pub json: bool,

    /// Suppress streamed helper log lines (terminal result only)
    #[arg(long)]
    pub quiet: bool,

    /// Replay buffer capacity for late-joining log observers
    #[arg(long, default_value_t = 100)]
    pub replay_capacity: usize,

    /// Grace period for the helper to wind down after Ctrl-C
    #[arg(long, default_value = "3s")]
    pub stop_grace: humantime::Duration,

    /// Arguments passed through to the helper, e.g. -- -u -s turn.example.com -b 55555
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Build a `SupervisorConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SupervisorConfig {
    SupervisorConfig {
        helper_program: args.helper.clone(),
        replay_capacity: args.replay_capacity,
        stop_grace: args.stop_grace.into(),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let supervisor = Supervisor::with_helper(
        &cfg,
        Arc::new(ProcessHelper::new(&cfg.helper_program)),
    );

    let (out_tx, out_handle) = spawn_output_writer();

    // Attach the log observer before starting so no line can slip between
    // the replay and the live stream.
    let mut logs = supervisor.subscribe_logs();
    let handle = supervisor
        .start(args.args.clone())
        .context("failed to start helper job")?;

    let log_task = {
        let out_tx = out_tx.clone();
        let quiet = args.quiet;
        tokio::spawn(async move {
            for event in logs.replay {
                if !quiet {
                    let _ = out_tx.send(OutputLine::Stderr(event.line));
                }
            }
            loop {
                match logs.live.recv().await {
                    Ok(event) => {
                        if !quiet {
                            let _ = out_tx.send(OutputLine::Stderr(event.line));
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "log observer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    // Ctrl-C requests a stop; the job handle then resolves with Cancelled.
    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received");
                supervisor.stop();
            }
        });
    }

    let result = match handle.wait().await {
        Ok(outcome) => {
            if args.json {
                let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&outcome)?));
            } else {
                let _ = out_tx.send(OutputLine::Stdout(format!("Completed: {}", outcome.output)));
            }
            Ok(())
        }
        Err(Error::Cancelled) => {
            // Give the helper's teardown a moment so its final lines still
            // reach the writer before we exit.
            tokio::time::sleep(cfg.stop_grace).await;
            let _ = out_tx.send(OutputLine::Stderr("Stopped.".to_string()));
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("helper job failed")),
    };

    drop(out_tx);
    log_task.abort();
    let _ = out_handle.await;
    result
}
