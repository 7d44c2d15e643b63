use std::sync::Arc;

use async_trait::async_trait;
use daq_control::{ControlError, DeviceLink, DeviceTransition, DirectTransitioner};
use daq_exec::{ProcessControl, ProcessWaiter, SpawnOptions};
use daq_model::{DeviceState, GenericState, TaskDescriptor, TaskStatus, TransitionRequest};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExitIntent, TransitionFailure, exit_status, terminated_event};
use crate::{error::CoreError, sink::TaskSink, timeouts::Timeouts};

/// Process-presence task: running process means RUNNING, no process means CONFIGURED.
#[derive(Debug, Clone)]
pub struct BasicTask {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    descriptor: TaskDescriptor,
    sink: TaskSink,
    timeouts: Arc<Timeouts>,
    process: Mutex<Option<ProcessControl<ExitIntent>>>,
}

impl BasicTask {
    pub(crate) fn new(descriptor: TaskDescriptor, sink: TaskSink, timeouts: Arc<Timeouts>) -> Self {
        Self {
            inner: Arc::new(Inner {
                descriptor,
                sink,
                timeouts,
                process: Mutex::new(None),
            }),
        }
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.inner.descriptor
    }

    pub async fn launch(&self) -> Result<(), CoreError> {
        self.start_process(true).await
    }

    /// Kill a running process (reported as KILLED), or report FINISHED when there is none.
    pub async fn kill(&self) -> Result<(), CoreError> {
        let task_id = &self.inner.descriptor.id;
        let slot = self.inner.process.lock().await;
        if let Some(process) = slot.as_ref().filter(|p| p.is_alive()) {
            debug!(target: "daq.core.task", %task_id, pid = process.pid(), "killing basic task");
            if let Err(e) = process.kill(Some(ExitIntent::Kill(TaskStatus::Killed))) {
                warn!(target: "daq.core.task", %task_id, error = %e, "could not kill task");
            }
            return Ok(());
        }
        drop(slot);

        debug!(target: "daq.core.task", %task_id, "no running process; finishing");
        self.inner.sink.send_status(TaskStatus::Finished, None).await;
        Ok(())
    }

    pub async fn transition(&self, req: &TransitionRequest) -> Result<GenericState, TransitionFailure> {
        DirectTransitioner
            .commit(self, req)
            .await
            .map_err(|e| TransitionFailure {
                state: e.state,
                error: e.error.into(),
            })
    }

    async fn start_process(&self, report_running: bool) -> Result<(), CoreError> {
        let d = &self.inner.descriptor;
        let mut slot = self.inner.process.lock().await;
        if slot.as_ref().is_some_and(ProcessControl::is_alive) {
            debug!(target: "daq.core.task", task_id = %d.id, "basic task already running");
            return Ok(());
        }

        let opts = SpawnOptions::default().with_timeout(d.timeout);
        let (control, waiter) = daq_exec::spawn(&d.id, &d.command, opts)?;
        info!(target: "daq.core.task", task_id = %d.id, pid = control.pid(), "basic task started");
        let pid = control.pid();
        *slot = Some(control);
        drop(slot);

        let this = self.clone();
        tokio::spawn(async move { this.monitor(pid, waiter, report_running).await });
        Ok(())
    }

    async fn stop_process(&self) {
        let slot = self.inner.process.lock().await;
        if let Some(process) = slot.as_ref().filter(|p| p.is_alive()) {
            if let Err(e) = process.kill(Some(ExitIntent::Stop)) {
                warn!(target: "daq.core.task", task_id = %self.inner.descriptor.id, error = %e, "could not stop task");
            }
        }
    }

    async fn monitor(self, pid: u32, waiter: ProcessWaiter<ExitIntent>, report_running: bool) {
        let inner = &self.inner;
        if report_running {
            tokio::time::sleep(inner.timeouts.running_delay).await;
            inner.sink.send_status(TaskStatus::Running, None).await;
        }
        let exit = waiter.wait().await;

        {
            let mut slot = inner.process.lock().await;
            if slot.as_ref().is_some_and(|p| p.pid() == pid) {
                *slot = None;
            }
        }

        let (status, message) = exit_status(&exit);
        inner.sink.send_event(terminated_event(&exit, status)).await;

        if exit.intent == Some(ExitIntent::Stop) {
            debug!(target: "daq.core.task", task_id = %inner.descriptor.id, "basic task stopped");
            return;
        }
        info!(target: "daq.core.task", task_id = %inner.descriptor.id, ?status, code = exit.exit_code(), "basic task ended");
        inner.sink.send_status(status, message).await;
    }
}

/// START spawns, STOP kills, everything else is accepted as-is.
#[async_trait]
impl DeviceLink for BasicTask {
    async fn transition(&self, step: DeviceTransition) -> Result<DeviceState, ControlError> {
        debug!(target: "daq.core.task", task_id = %self.inner.descriptor.id, event = %step.event, "basic task transition");
        match (step.src.as_str(), step.event.as_str(), step.dst.as_str()) {
            ("CONFIGURED", "START", "RUNNING") => match self.start_process(false).await {
                Ok(()) => Ok(step.dst),
                Err(e) => Err(ControlError::Transition {
                    state: step.src,
                    reason: e.to_string(),
                }),
            },
            ("RUNNING", "STOP", "CONFIGURED") => {
                self.stop_process().await;
                Ok(step.dst)
            }
            _ => Ok(step.dst),
        }
    }
}
