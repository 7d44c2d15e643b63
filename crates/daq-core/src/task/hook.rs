use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use daq_control::{ControlError, DeviceLink, DeviceTransition, DirectTransitioner};
use daq_exec::{ProcessControl, ProcessWaiter, SpawnOptions};
use daq_model::{DeviceState, GenericState, TaskDescriptor, TaskStatus, TransitionRequest};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::{ExitIntent, TransitionFailure, exit_status, terminated_event};
use crate::{error::CoreError, sink::TaskSink, timeouts::Timeouts};

/// A command that runs only when triggered, e.g. end-of-run cleanup.
///
/// The task itself reports RUNNING at launch without any process. Each [`HookTask::trigger`]
/// runs the command once and publishes its outcome as a termination device event.
#[derive(Debug, Clone)]
pub struct HookTask {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    descriptor: TaskDescriptor,
    sink: TaskSink,
    timeouts: Arc<Timeouts>,
    process: Mutex<Option<ProcessControl<ExitIntent>>>,
    running: watch::Sender<bool>,
}

impl HookTask {
    pub(crate) fn new(descriptor: TaskDescriptor, sink: TaskSink, timeouts: Arc<Timeouts>) -> Self {
        Self {
            inner: Arc::new(Inner {
                descriptor,
                sink,
                timeouts,
                process: Mutex::new(None),
                running: watch::Sender::new(false),
            }),
        }
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.inner.descriptor
    }

    /// How long a kill waits for a running hook.
    pub fn grace(&self) -> Duration {
        self.inner.timeouts.hook_grace(self.inner.descriptor.timeout)
    }

    pub async fn launch(&self) -> Result<(), CoreError> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.timeouts.running_delay).await;
            this.inner.sink.send_status(TaskStatus::Running, None).await;
        });
        Ok(())
    }

    pub async fn trigger(&self) -> Result<(), CoreError> {
        let d = &self.inner.descriptor;
        let mut slot = self.inner.process.lock().await;
        if *self.inner.running.borrow() {
            return Err(CoreError::HookBusy(d.id.clone()));
        }

        let opts = SpawnOptions::default().with_timeout(d.timeout);
        let (control, waiter) = daq_exec::spawn(&d.id, &d.command, opts)?;
        info!(target: "daq.core.task", task_id = %d.id, pid = control.pid(), "hook triggered");
        *slot = Some(control);
        self.inner.running.send_replace(true);
        drop(slot);

        let this = self.clone();
        tokio::spawn(async move { this.monitor(waiter).await });
        Ok(())
    }

    /// Give a running hook up to [`HookTask::grace`] to finish, then force it; report FINISHED.
    pub async fn kill(&self) -> Result<(), CoreError> {
        let task_id = &self.inner.descriptor.id;
        let grace = self.grace();
        let mut running = self.inner.running.subscribe();

        if *running.borrow_and_update() {
            debug!(target: "daq.core.task", %task_id, ?grace, "waiting for running hook");
            let finished = tokio::time::timeout(grace, running.wait_for(|r| !*r))
                .await
                .is_ok();
            if !finished {
                warn!(target: "daq.core.task", %task_id, ?grace, "hook still running after grace window; killing");
                if let Some(process) = self.inner.process.lock().await.as_ref() {
                    if let Err(e) = process.kill(Some(ExitIntent::Kill(TaskStatus::Killed))) {
                        warn!(target: "daq.core.task", %task_id, error = %e, "could not kill hook");
                    }
                }
            }
        }

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

    async fn monitor(self, waiter: ProcessWaiter<ExitIntent>) {
        let inner = &self.inner;
        let exit = waiter.wait().await;

        *inner.process.lock().await = None;
        inner.running.send_replace(false);

        let (status, _) = exit_status(&exit);
        debug!(target: "daq.core.task", task_id = %inner.descriptor.id, ?status, code = exit.exit_code(), "hook ended");
        inner.sink.send_event(terminated_event(&exit, status)).await;
    }
}

/// Hooks model no state; every transition lands on its destination.
#[async_trait]
impl DeviceLink for HookTask {
    async fn transition(&self, step: DeviceTransition) -> Result<DeviceState, ControlError> {
        debug!(target: "daq.core.task", task_id = %self.inner.descriptor.id, event = %step.event, "hook task transition");
        Ok(step.dst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::task::{Task, testutil::*};
    use daq_model::DeviceEventKind;
    use serde_json::json;

    fn hook(line: &str) -> serde_json::Value {
        json!({"value": line, "shell": true, "controlMode": "hook"})
    }

    #[tokio::test]
    async fn launch_reports_running_without_process() {
        let (t, mut rx) = task(hook("echo done"));
        t.launch().await.unwrap();
        assert_eq!(next_status(&mut rx).await.state, TaskStatus::Running);
        assert!(rx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn trigger_runs_once_and_emits_event() {
        let (t, mut rx) = task(hook("echo done"));
        t.launch().await.unwrap();
        t.trigger().await.unwrap();

        match rx.events.recv().await.unwrap().kind {
            DeviceEventKind::BasicTaskTerminated(b) => {
                assert_eq!(b.exit_code, 0);
                assert_eq!(b.stdout, "done\n");
                assert_eq!(b.final_state, TaskStatus::Finished);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next_status(&mut rx).await.state, TaskStatus::Running);
    }

    #[tokio::test]
    async fn second_trigger_while_running_is_busy() {
        let (t, _rx) = task(hook("sleep 30"));
        t.trigger().await.unwrap();
        assert!(matches!(t.trigger().await, Err(CoreError::HookBusy(_))));
        t.kill().await.unwrap();
    }

    #[tokio::test]
    async fn kill_waits_for_short_hook() {
        let (t, mut rx) = task(hook("sleep 0.2"));
        t.launch().await.unwrap();
        assert_eq!(next_status(&mut rx).await.state, TaskStatus::Running);
        t.trigger().await.unwrap();

        t.kill().await.unwrap();
        match rx.events.recv().await.unwrap().kind {
            DeviceEventKind::BasicTaskTerminated(b) => assert!(b.voluntary_termination),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next_status(&mut rx).await.state, TaskStatus::Finished);
    }

    #[tokio::test]
    async fn kill_forces_hook_after_grace() {
        let (t, mut rx) = task(hook("sleep 30"));
        assert_eq!(t.removal_grace(), Some(fast_timeouts().hook_grace_cap));
        t.trigger().await.unwrap();

        let started = Instant::now();
        t.kill().await.unwrap();
        assert!(started.elapsed() >= fast_timeouts().hook_grace_cap);

        match rx.events.recv().await.unwrap().kind {
            DeviceEventKind::BasicTaskTerminated(b) => {
                assert!(!b.voluntary_termination);
                assert_eq!(b.final_state, TaskStatus::Killed);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next_status(&mut rx).await.state, TaskStatus::Finished);
    }

    #[tokio::test]
    async fn transitions_always_land_on_destination() {
        let (t, _rx) = task(hook("true"));
        let s = t
            .transition(&TransitionRequest::new("START", GenericState::CONFIGURED, GenericState::RUNNING))
            .await
            .unwrap();
        assert_eq!(s, GenericState::RUNNING);
        assert!(matches!(t, Task::Hook(_)));
    }
}
