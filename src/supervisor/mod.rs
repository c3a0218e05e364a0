//! Supervision of the external converter process.
//!
//! One run goes through `Running -> Exited`, observing two soft states on
//! the way: a periodic status report while the process is alive, and a
//! stall report after prolonged silence. The supervisor never kills the
//! process; the only bounded wait is on the output drain after exit.

pub mod drain;
pub mod poll;

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::convert::summary::format_elapsed;

pub use drain::{classify, LineLevel, OutputBuffer};
pub use poll::{AdaptivePoll, Liveness};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Process output was not captured")]
    MissingPipe,
}

/// Result of one supervised run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Exit code, `None` when terminated by a signal.
    pub exit_code: Option<i32>,

    /// Every non-empty output line, stdout and stderr merged.
    pub output: Vec<String>,

    pub elapsed: Duration,
    pub status_reports: usize,
    pub stall_reports: usize,

    /// The drain did not finish within the bounded wait.
    pub drain_abandoned: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` output lines, newline separated.
    pub fn tail(&self, lines: usize) -> String {
        let start = self.output.len().saturating_sub(lines);
        self.output[start..].join("\n")
    }
}

/// Runs external processes under the configured cadence.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Spawn `command` and supervise it until exit.
    ///
    /// `label` tags every log line (the layer name).
    pub async fn run(
        &self,
        label: &str,
        mut command: Command,
    ) -> Result<ProcessOutcome, SupervisorError> {
        let started = Instant::now();
        let program = command.as_std().get_program().to_string_lossy().to_string();

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn { program, source })?;

        let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipe)?;
        let stderr = child.stderr.take().ok_or(SupervisorError::MissingPipe)?;

        let buffer = OutputBuffer::default();
        let (done_tx, done_rx) = oneshot::channel();
        let mut drain = drain::spawn(label.to_string(), stdout, stderr, buffer.clone(), done_tx);

        let mut poll = AdaptivePoll::new(&self.config);
        let mut liveness = Liveness::new(started, &self.config);
        let mut outcome = ProcessOutcome::default();

        let status = loop {
            if let Some(status) = child.try_wait().map_err(SupervisorError::Wait)? {
                break status;
            }
            tokio::time::sleep(poll.interval()).await;

            let now = Instant::now();
            let lines = buffer.len().await;
            poll.observe(liveness.observe(now, lines));

            if liveness.status_due(now) && matches!(child.try_wait(), Ok(None)) {
                info!(
                    layer = label,
                    elapsed = %format_elapsed(liveness.elapsed(now)),
                    messages = lines,
                    "Conversion in progress"
                );
                outcome.status_reports += 1;
            }

            if liveness.stall_due(now) && matches!(child.try_wait(), Ok(None)) {
                debug!(
                    layer = label,
                    elapsed = %format_elapsed(liveness.elapsed(now)),
                    "No output for a while, still processing"
                );
                outcome.stall_reports += 1;
            }
        };

        if timeout(self.config.drain_wait, done_rx).await.is_err() {
            warn!(layer = label, "Output drain did not finish, continuing with partial output");
            outcome.drain_abandoned = true;
        }
        match timeout(self.config.join_timeout, &mut drain).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(layer = label, error = %e, "Output drain task failed"),
            Err(_) => {
                drain.abort();
                outcome.drain_abandoned = true;
            }
        }

        outcome.exit_code = status.code();
        outcome.output = buffer.snapshot().await;
        outcome.elapsed = started.elapsed();
        Ok(outcome)
    }
}
