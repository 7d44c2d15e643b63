use daq_control::ControlError;
use daq_exec::ExecError;
use daq_model::{ModelError, TaskId};
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid task ID: {0}")]
    InvalidTaskId(TaskId),

    #[error("no active task {0}")]
    NoActiveTask(TaskId),

    #[error("task id already active: {0}")]
    DuplicateTask(TaskId),

    #[error("no control link for task {0}")]
    NoControlLink(TaskId),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("task {0} is not a hook")]
    NotAHook(TaskId),

    #[error("hook {0} is already running")]
    HookBusy(TaskId),

    #[error("command addressed to {target}, not {task}")]
    WrongTarget { target: TaskId, task: TaskId },

    #[error("aborted by transport: {0}")]
    Aborted(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
