//! Task lifecycle variants.
//!
//! A [`Task`] is built once per LAUNCH by [`Task::new`], which picks the variant from the
//! descriptor's control mode:
//!
//! | mode            | variant                | process                     | transitions            |
//! |-----------------|------------------------|-----------------------------|------------------------|
//! | `basic`         | [`BasicTask`]          | spawned at launch           | START/STOP, else no-op |
//! | `hook`          | [`HookTask`]           | spawned on each trigger     | always accepted        |
//! | `direct/fairmq` | [`ControllableTask`]   | spawned at launch, RPC link | through the device     |
//!
//! Background work reports through the task's [`TaskSink`](crate::TaskSink); a task never sees
//! the live-task table.
mod basic;
mod controllable;
mod hook;

pub use basic::BasicTask;
pub use controllable::ControllableTask;
pub use hook::HookTask;

use std::{sync::Arc, time::Duration};

use daq_exec::{ExitCause, ProcessExit};
use daq_model::{
    BasicTaskTerminated, CommandHeader, ControlMode, DeviceEventKind, GenericState,
    TaskDescriptor, TaskId, TaskStatus, TransitionCommand, TransitionRequest,
};
use serde_json::Value;
use thiserror::Error;

use crate::{error::CoreError, sink::TaskSink, timeouts::Timeouts};

/// What a killer wants the process exit to be reported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitIntent {
    /// Report this terminal status.
    Kill(TaskStatus),
    /// The process was stopped by a transition; the task stays alive.
    Stop,
}

/// A rejected transition together with the generic state the task is in afterwards.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct TransitionFailure {
    pub state: GenericState,
    #[source]
    pub error: CoreError,
}

#[derive(Debug)]
pub enum Task {
    Basic(BasicTask),
    Controllable(ControllableTask),
    Hook(HookTask),
}

impl Task {
    pub fn new(descriptor: TaskDescriptor, sink: TaskSink, timeouts: Arc<Timeouts>) -> Self {
        match descriptor.control_mode {
            ControlMode::Basic => Task::Basic(BasicTask::new(descriptor, sink, timeouts)),
            ControlMode::Hook => Task::Hook(HookTask::new(descriptor, sink, timeouts)),
            ControlMode::Direct | ControlMode::Fairmq => {
                Task::Controllable(ControllableTask::new(descriptor, sink, timeouts))
            }
        }
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        match self {
            Task::Basic(t) => t.descriptor(),
            Task::Controllable(t) => t.descriptor(),
            Task::Hook(t) => t.descriptor(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.descriptor().id
    }

    pub fn is_hook(&self) -> bool {
        matches!(self, Task::Hook(_))
    }

    /// Start the task. Returns once the process (if any) is spawned; readiness and RUNNING
    /// are reported asynchronously.
    pub async fn launch(&self) -> Result<(), CoreError> {
        match self {
            Task::Basic(t) => t.launch().await,
            Task::Controllable(t) => t.launch().await,
            Task::Hook(t) => t.launch().await,
        }
    }

    pub async fn kill(&self) -> Result<(), CoreError> {
        match self {
            Task::Basic(t) => t.kill().await,
            Task::Controllable(t) => t.kill().await,
            Task::Hook(t) => t.kill().await,
        }
    }

    pub async fn transition(&self, req: &TransitionRequest) -> Result<GenericState, TransitionFailure> {
        match self {
            Task::Basic(t) => t.transition(req).await,
            Task::Controllable(t) => t.transition(req).await,
            Task::Hook(t) => t.transition(req).await,
        }
    }

    pub async fn trigger(&self) -> Result<(), CoreError> {
        match self {
            Task::Hook(t) => t.trigger().await,
            _ => Err(CoreError::NotAHook(self.id().clone())),
        }
    }

    /// Decode a transition command addressed to this task.
    pub fn unmarshal_transition(&self, data: &Value) -> Result<TransitionCommand, CoreError> {
        let target = CommandHeader::decode(data)?.single_target()?.clone();
        if target != *self.id() {
            return Err(CoreError::WrongTarget {
                target,
                task: self.id().clone(),
            });
        }
        Ok(TransitionCommand::decode(data)?)
    }

    /// How long the router keeps a killed task routable.
    pub fn removal_grace(&self) -> Option<Duration> {
        match self {
            Task::Hook(t) => Some(t.grace()),
            _ => None,
        }
    }
}

/// Terminal status for a finished process.
pub(crate) fn exit_status(exit: &ProcessExit<ExitIntent>) -> (TaskStatus, Option<String>) {
    match exit.intent {
        Some(ExitIntent::Kill(status)) => (status, None),
        Some(ExitIntent::Stop) => (TaskStatus::Killed, None),
        None => match &exit.cause {
            ExitCause::TimedOut => (TaskStatus::Failed, Some("timed out".to_string())),
            ExitCause::Exited if exit.success() => (TaskStatus::Finished, None),
            ExitCause::Exited => (
                TaskStatus::Failed,
                Some(format!("exit status {}", exit.exit_code())),
            ),
            ExitCause::Signaled => (
                TaskStatus::Failed,
                Some(format!("terminated by signal {}", exit.signal.unwrap_or_default())),
            ),
            ExitCause::WaitFailed(e) => (TaskStatus::Failed, Some(format!("wait failed: {e}"))),
        },
    }
}

pub(crate) fn terminated_event(exit: &ProcessExit<ExitIntent>, final_state: TaskStatus) -> DeviceEventKind {
    DeviceEventKind::BasicTaskTerminated(BasicTaskTerminated {
        exit_code: exit.exit_code(),
        stdout: exit.stdout.clone(),
        stderr: exit.stderr.clone(),
        voluntary_termination: exit.intent.is_none(),
        final_state,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testutil::*;

    #[test]
    fn factory_picks_variant_from_mode() {
        let (t, _rx) = task(json!({"value": "true", "controlMode": "basic"}));
        assert!(matches!(t, Task::Basic(_)));
        let (t, _rx) = task(json!({"value": "true", "controlMode": "hook"}));
        assert!(matches!(t, Task::Hook(_)));
        assert!(t.is_hook());
        let (t, _rx) = task(json!({"value": "true", "controlMode": "fairmq", "controlPort": 1}));
        assert!(matches!(t, Task::Controllable(_)));
        let (t, _rx) = task(json!({"value": "true", "controlMode": "direct", "controlPort": 1}));
        assert!(matches!(t, Task::Controllable(_)));
        assert!(t.removal_grace().is_none());
    }

    #[test]
    fn unmarshal_transition_checks_target() {
        let (t, _rx) = task(basic("true"));
        let cmd = t
            .unmarshal_transition(&json!({
                "name": "Transition",
                "source": "STANDBY",
                "event": "CONFIGURE",
                "destination": "CONFIGURED",
                "targetList": [{"taskId": "t-1"}]
            }))
            .unwrap();
        assert_eq!(cmd.event, "CONFIGURE");

        let err = t
            .unmarshal_transition(&json!({
                "name": "Transition",
                "source": "STANDBY",
                "event": "CONFIGURE",
                "destination": "CONFIGURED",
                "targetList": [{"taskId": "other"}]
            }))
            .unwrap_err();
        assert!(matches!(err, CoreError::WrongTarget { .. }));
    }

    #[tokio::test]
    async fn trigger_on_non_hook_is_rejected() {
        let (t, _rx) = task(basic("true"));
        assert!(matches!(t.trigger().await, Err(CoreError::NotAHook(_))));
    }

    #[test]
    fn exit_status_prefers_recorded_intent() {
        let mut exit = ProcessExit {
            code: None,
            signal: Some(9),
            cause: ExitCause::Signaled,
            stdout: String::new(),
            stderr: String::new(),
            intent: Some(ExitIntent::Kill(TaskStatus::Killed)),
        };
        assert_eq!(exit_status(&exit), (TaskStatus::Killed, None));

        exit.intent = None;
        let (status, msg) = exit_status(&exit);
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(msg.as_deref(), Some("terminated by signal 9"));

        exit.cause = ExitCause::TimedOut;
        assert_eq!(exit_status(&exit).1.as_deref(), Some("timed out"));
    }

    #[test]
    fn terminated_event_carries_output() {
        let exit = ProcessExit {
            code: Some(0),
            signal: None,
            cause: ExitCause::Exited,
            stdout: "out".into(),
            stderr: "err".into(),
            intent: None,
        };
        match terminated_event(&exit, TaskStatus::Finished) {
            DeviceEventKind::BasicTaskTerminated(b) => {
                assert_eq!(b.exit_code, 0);
                assert_eq!(b.stdout, "out");
                assert!(b.voluntary_termination);
                assert_eq!(b.final_state, TaskStatus::Finished);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
