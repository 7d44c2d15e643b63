//! Spawn, wait and kill for a single task command.
//!
//! [`spawn`] returns two halves:
//! - [`ProcessControl`] is cheap to clone and may be shared by anything that needs to signal
//!   the process (kill paths, transition handlers).
//! - [`ProcessWaiter`] is owned by exactly one waiter and resolves to a [`ProcessExit`] once the
//!   process is gone and its output pumps are drained.
//!
//! A killer can record an intent through [`ProcessControl::kill`] before signaling; the waiter
//! hands it back in [`ProcessExit::intent`].
mod command;
mod output;

pub use output::CAPTURE_LIMIT;

use std::{os::unix::process::ExitStatusExt, time::Duration};

use daq_model::{Command as TaskCommand, TaskId};
use tokio::{process::Child, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    error::ExecError,
    pending::{PendingRx, PendingTx, pending_slot},
    utils::pgroup::ProcessGroup,
};
use output::{SharedTail, StreamKind};

/// How long the output pumps may keep reading after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Kill the group and report [`ExitCause::TimedOut`] after this long.
    pub timeout: Option<Duration>,
}

impl SpawnOptions {
    #[inline]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    Exited,
    Signaled,
    TimedOut,
    WaitFailed(String),
}

#[derive(Debug)]
pub struct ProcessExit<T> {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub cause: ExitCause,
    pub stdout: String,
    pub stderr: String,
    /// Value recorded by the first [`ProcessControl::kill`] that carried one.
    pub intent: Option<T>,
}

impl<T> ProcessExit<T> {
    /// Exit code, `-1` when there is none (signal, timeout, wait failure).
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    pub fn success(&self) -> bool {
        self.cause == ExitCause::Exited && self.code == Some(0)
    }
}

#[derive(Debug)]
pub struct ProcessControl<T> {
    pid: u32,
    group: ProcessGroup,
    pending: PendingTx<T>,
}

impl<T> Clone for ProcessControl<T> {
    fn clone(&self) -> Self {
        Self {
            pid: self.pid,
            group: self.group,
            pending: self.pending.clone(),
        }
    }
}

impl<T> ProcessControl<T> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn group(&self) -> ProcessGroup {
        self.group
    }

    /// Record `intent` (first one wins) and `SIGKILL` the whole group.
    pub fn kill(&self, intent: Option<T>) -> Result<(), ExecError> {
        if let Some(intent) = intent {
            if !self.pending.record(intent) {
                trace!(target: "daq.exec", pid = self.pid, "kill intent already recorded");
            }
        }
        self.group.kill()
    }

    pub fn is_alive(&self) -> bool {
        self.group.is_alive()
    }
}

#[derive(Debug)]
pub struct ProcessWaiter<T> {
    task_id: TaskId,
    child: Child,
    group: ProcessGroup,
    pending: PendingRx<T>,
    timeout: Option<Duration>,
    stdout: (SharedTail, JoinHandle<()>),
    stderr: (SharedTail, JoinHandle<()>),
}

impl<T> ProcessWaiter<T> {
    /// Wait for the process to exit, then collect its output and recorded intent.
    pub async fn wait(mut self) -> ProcessExit<T> {
        let (status, timed_out) = match self.timeout {
            Some(limit) => {
                tokio::select! {
                    status = self.child.wait() => (status, false),
                    _ = tokio::time::sleep(limit) => {
                        debug!(target: "daq.exec", task_id = %self.task_id, ?limit, "task timed out; killing process group");
                        if let Err(e) = self.group.kill() {
                            warn!(target: "daq.exec", task_id = %self.task_id, error = %e, "kill after timeout failed");
                        }
                        (self.child.wait().await, true)
                    }
                }
            }
            None => (self.child.wait().await, false),
        };

        let stdout = drain(self.stdout).await;
        let stderr = drain(self.stderr).await;
        let intent = self.pending.take();

        let (code, signal, cause) = match status {
            Ok(_) if timed_out => (None, None, ExitCause::TimedOut),
            Ok(st) => match (st.code(), st.signal()) {
                (Some(code), _) => (Some(code), None, ExitCause::Exited),
                (None, sig) => (None, sig, ExitCause::Signaled),
            },
            Err(e) => (None, None, ExitCause::WaitFailed(e.to_string())),
        };

        debug!(
            target: "daq.exec",
            task_id = %self.task_id,
            pid = self.group.pgid(),
            ?code,
            ?signal,
            ?cause,
            "process exited"
        );

        ProcessExit {
            code,
            signal,
            cause,
            stdout,
            stderr,
            intent,
        }
    }
}

async fn drain((tail, handle): (SharedTail, JoinHandle<()>)) -> String {
    let abort = handle.abort_handle();
    if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
        abort.abort();
    }
    tail.lock().await.to_string_lossy()
}

/// Spawn `command` for `task_id` in a new process group.
///
/// Must be called from within a tokio runtime.
pub fn spawn<T>(
    task_id: &TaskId,
    command: &TaskCommand,
    opts: SpawnOptions,
) -> Result<(ProcessControl<T>, ProcessWaiter<T>), ExecError> {
    let mut cmd = command::build(task_id, command)?;
    let mut child = cmd
        .spawn()
        .map_err(|e| ExecError::Spawn(format!("{}: {e}", command.value)))?;
    let pid = child.id().ok_or(ExecError::NoPid)?;
    let group = ProcessGroup::led_by(pid);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Spawn("stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Spawn("stderr not piped".into()))?;
    let stdout = output::pump(stdout, StreamKind::Stdout, command.stdout, task_id.clone());
    let stderr = output::pump(stderr, StreamKind::Stderr, command.stderr, task_id.clone());

    debug!(target: "daq.exec", %task_id, pid, cmd = %command.display_line(), "task process started");

    let (pending_tx, pending_rx) = pending_slot();
    Ok((
        ProcessControl {
            pid,
            group,
            pending: pending_tx,
        },
        ProcessWaiter {
            task_id: task_id.clone(),
            child,
            group,
            pending: pending_rx,
            timeout: opts.timeout,
            stdout,
            stderr,
        },
    ))
}
