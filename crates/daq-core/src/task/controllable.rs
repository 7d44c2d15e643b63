use std::sync::Arc;

use daq_control::{ControlClient, ControlError, DeviceEventStream, Transitioner};
use daq_exec::{ProcessControl, ProcessWaiter, SpawnOptions};
use daq_model::{
    GenericState, OutboundMessage, TaskDescriptor, TaskPid, TaskStatus, TransitionRequest,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, trace, warn};

use super::{ExitIntent, TransitionFailure, exit_status};
use crate::{error::CoreError, sink::TaskSink, timeouts::Timeouts};

/// A process that exposes an OCC control port on loopback.
///
/// After launch the task dials the port, waits for the device to report STANDBY, then reports
/// RUNNING and republishes device events until the process ends.
#[derive(Debug, Clone)]
pub struct ControllableTask {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    descriptor: TaskDescriptor,
    sink: TaskSink,
    timeouts: Arc<Timeouts>,
    transitioner: Transitioner,
    process: Mutex<Option<ProcessControl<ExitIntent>>>,
    client: Mutex<Option<Arc<ControlClient>>>,
}

impl ControllableTask {
    pub(crate) fn new(descriptor: TaskDescriptor, sink: TaskSink, timeouts: Arc<Timeouts>) -> Self {
        let transitioner = Transitioner::for_mode(descriptor.control_mode);
        Self {
            inner: Arc::new(Inner {
                descriptor,
                sink,
                timeouts,
                transitioner,
                process: Mutex::new(None),
                client: Mutex::new(None),
            }),
        }
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.inner.descriptor
    }

    pub async fn launch(&self) -> Result<(), CoreError> {
        let d = &self.inner.descriptor;
        let opts = SpawnOptions::default().with_timeout(d.timeout);
        let (control, waiter) = daq_exec::spawn(&d.id, &d.command, opts)?;
        info!(
            target: "daq.core.task",
            task_id = %d.id,
            pid = control.pid(),
            port = d.control_port,
            transitioner = self.inner.transitioner.name(),
            "controllable task spawned"
        );

        *self.inner.process.lock().await = Some(control.clone());
        let this = self.clone();
        tokio::spawn(async move { this.run(control, waiter).await });
        Ok(())
    }

    /// Walk the device down to DONE, then signal the process group.
    ///
    /// The terminal status is FINISHED if the device reached DONE, KILLED otherwise.
    pub async fn kill(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let task_id = &inner.descriptor.id;

        let client = inner.client.lock().await.clone();
        let reached_done = match client {
            Some(client) => self.walk_to_done(&client).await,
            None => false,
        };
        self.close_client().await;

        let Some(process) = inner.process.lock().await.clone() else {
            debug!(target: "daq.core.task", %task_id, "process already gone");
            return Ok(());
        };

        let status = if reached_done {
            tokio::time::sleep(inner.timeouts.done_linger).await;
            TaskStatus::Finished
        } else {
            TaskStatus::Killed
        };
        if let Err(e) = process.kill(Some(ExitIntent::Kill(status))) {
            warn!(target: "daq.core.task", %task_id, error = %e, "could not signal process group");
        }
        Ok(())
    }

    pub async fn transition(&self, req: &TransitionRequest) -> Result<GenericState, TransitionFailure> {
        let client = self.inner.client.lock().await.clone();
        let Some(client) = client else {
            return Err(TransitionFailure {
                state: req.source.clone(),
                error: CoreError::NoControlLink(self.inner.descriptor.id.clone()),
            });
        };

        self.inner
            .transitioner
            .commit(client.as_ref(), req)
            .await
            .map_err(|e| TransitionFailure {
                state: e.state,
                error: e.error.into(),
            })
    }

    async fn run(self, control: ProcessControl<ExitIntent>, waiter: ProcessWaiter<ExitIntent>) {
        let inner = &self.inner;
        let task_id = &inner.descriptor.id;
        let exit = waiter.wait();
        tokio::pin!(exit);

        let startup = tokio::select! {
            res = self.start_control() => res,
            exit = &mut exit => {
                self.close_client().await;
                self.clear_process().await;
                let (status, message) = match exit.intent {
                    Some(_) => exit_status(&exit),
                    None => (TaskStatus::Failed, Some("process exited during startup".to_string())),
                };
                warn!(target: "daq.core.task", %task_id, ?status, code = exit.exit_code(), "process ended before it was ready");
                inner.sink.send_status(status, message).await;
                return;
            }
        };

        let (mut stream, device_pid) = match startup {
            Ok(ready) => ready,
            Err(e) => {
                warn!(target: "daq.core.task", %task_id, error = %e, "control startup failed");
                self.close_client().await;
                if let Err(kill_err) = control.kill(None) {
                    debug!(target: "daq.core.task", %task_id, error = %kill_err, "could not signal process group");
                }
                let exit = exit.await;
                self.clear_process().await;
                let (status, message) = match exit.intent {
                    Some(_) => exit_status(&exit),
                    None => (TaskStatus::Failed, Some(e.to_string())),
                };
                inner.sink.send_status(status, message).await;
                return;
            }
        };

        let pid = if device_pid > 0 {
            device_pid
        } else {
            control.pid() as i32
        };
        info!(target: "daq.core.task", %task_id, pid, "task ready");
        inner.sink.send_status(TaskStatus::Running, None).await;
        inner
            .sink
            .send_message(OutboundMessage::TaskPid(TaskPid {
                task_id: task_id.clone(),
                pid,
            }))
            .await;

        let sink = inner.sink.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(kind) = stream.next().await {
                sink.send_event(kind).await;
            }
        });

        let exit = exit.await;
        self.close_client().await;
        self.clear_process().await;
        if let Err(e) = forwarder.await {
            debug!(target: "daq.core.task", %task_id, error = %e, "event forwarder ended abnormally");
        }

        let (status, message) = exit_status(&exit);
        info!(target: "daq.core.task", %task_id, ?status, code = exit.exit_code(), "controllable task ended");
        inner.sink.send_status(status, message).await;
    }

    async fn start_control(&self) -> Result<(DeviceEventStream, i32), ControlError> {
        let d = &self.inner.descriptor;
        let client = Arc::new(ControlClient::dial(d.control_port, self.inner.timeouts.dial).await?);
        debug!(target: "daq.core.task", task_id = %d.id, endpoint = client.endpoint(), "waiting for STANDBY");
        *self.inner.client.lock().await = Some(client.clone());

        let pid = self.await_standby(&client).await?;
        let stream = client.event_stream().await?;
        Ok((stream, pid))
    }

    /// Poll the device until it reports STANDBY; returns the pid it reports.
    async fn await_standby(&self, client: &ControlClient) -> Result<i32, ControlError> {
        let t = &self.inner.timeouts;
        let task_id = &self.inner.descriptor.id;
        let deadline = Instant::now() + t.readiness;
        let mut last = GenericState::UNKNOWN;

        loop {
            match tokio::time::timeout_at(deadline, client.get_state()).await {
                Ok(Ok(status)) => {
                    last = self.inner.transitioner.from_device_state(&status.state);
                    if last == GenericState::STANDBY {
                        return Ok(status.pid);
                    }
                    if last.is_startup_failure() {
                        return Err(ControlError::StartupFailed(last));
                    }
                }
                Ok(Err(e)) if e.is_unavailable() => {
                    trace!(target: "daq.core.task", %task_id, "control endpoint not serving yet")
                }
                Ok(Err(e)) => debug!(target: "daq.core.task", %task_id, error = %e, "state poll failed"),
                Err(_) => break,
            }
            tokio::time::sleep(t.poll).await;
            if Instant::now() >= deadline {
                break;
            }
        }

        Err(ControlError::ReadinessTimeout {
            expected: GenericState::STANDBY,
            last,
            timeout: t.readiness,
        })
    }

    /// Returns `true` once the device reports DONE. Stops on the first error, timeout or step
    /// that makes no progress.
    async fn walk_to_done(&self, client: &ControlClient) -> bool {
        let t = &self.inner.timeouts;
        let transitioner = &self.inner.transitioner;
        let task_id = &self.inner.descriptor.id;

        let mut state = match tokio::time::timeout(t.kill_step, client.get_state()).await {
            Ok(Ok(status)) => transitioner.from_device_state(&status.state),
            Ok(Err(e)) => {
                warn!(target: "daq.core.task", %task_id, error = %e, "cannot query state before kill");
                return false;
            }
            Err(_) => {
                warn!(target: "daq.core.task", %task_id, "state query timed out before kill");
                return false;
            }
        };

        while state != GenericState::DONE {
            let Some((event, dst)) = teardown_step(&state) else {
                debug!(target: "daq.core.task", %task_id, %state, "no teardown step from state");
                return false;
            };
            let req = TransitionRequest::new(event, state.clone(), dst);
            match tokio::time::timeout(t.kill_step, transitioner.commit(client, &req)).await {
                Ok(Ok(reached)) if reached != state => {
                    debug!(target: "daq.core.task", %task_id, event, %reached, "teardown step done");
                    state = reached;
                }
                Ok(Ok(_)) => {
                    warn!(target: "daq.core.task", %task_id, event, %state, "teardown step made no progress");
                    return false;
                }
                Ok(Err(e)) => {
                    warn!(target: "daq.core.task", %task_id, event, state = %e.state, error = %e.error, "teardown step failed");
                    return false;
                }
                Err(_) => {
                    warn!(target: "daq.core.task", %task_id, event, "teardown step timed out");
                    return false;
                }
            }
        }
        true
    }

    async fn close_client(&self) {
        let client = self.inner.client.lock().await.take();
        if let Some(client) = client {
            client.close().await;
        }
    }

    async fn clear_process(&self) {
        *self.inner.process.lock().await = None;
    }
}

/// Next event on the way from `state` to DONE.
fn teardown_step(state: &GenericState) -> Option<(&'static str, GenericState)> {
    if *state == GenericState::RUNNING {
        Some(("STOP", GenericState::CONFIGURED))
    } else if *state == GenericState::CONFIGURED {
        Some(("RESET", GenericState::STANDBY))
    } else if *state == GenericState::ERROR {
        Some(("RECOVER", GenericState::STANDBY))
    } else if *state == GenericState::STANDBY {
        Some(("EXIT", GenericState::DONE))
    } else {
        None
    }
}
