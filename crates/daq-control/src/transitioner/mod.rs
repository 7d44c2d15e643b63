//! Translation between the generic lifecycle and a device's own state machine.
//!
//! A [`Transitioner`] never talks to a process itself: every device-level step goes through the
//! [`DeviceLink`] handed to [`Transitioner::commit`], which in production is the
//! [`ControlClient`](crate::ControlClient).
mod direct;
mod fairmq;

pub use direct::DirectTransitioner;
pub use fairmq::FairMqTransitioner;

use std::collections::HashMap;

use async_trait::async_trait;
use daq_model::{ControlMode, DeviceState, GenericState, TransitionRequest};
use thiserror::Error;

use crate::error::ControlError;

/// One device-level request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTransition {
    pub event: String,
    pub src: DeviceState,
    pub dst: DeviceState,
    pub arguments: HashMap<String, String>,
}

impl DeviceTransition {
    pub fn new(event: impl Into<String>, src: DeviceState, dst: DeviceState) -> Self {
        Self {
            event: event.into(),
            src,
            dst,
            arguments: HashMap::new(),
        }
    }

    #[inline]
    pub fn with_arguments(mut self, arguments: HashMap<String, String>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// The transition function a transitioner drives.
///
/// On failure the error carries the device state that was reached, if the device answered
/// (see [`ControlError::reached_state`]).
#[async_trait]
pub trait DeviceLink: Send + Sync {
    async fn transition(&self, step: DeviceTransition) -> Result<DeviceState, ControlError>;
}

/// A failed commit together with the generic state the task ended up in.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct CommitError {
    pub state: GenericState,
    #[source]
    pub error: ControlError,
}

pub type CommitResult = Result<GenericState, CommitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transitioner {
    Direct(DirectTransitioner),
    FairMq(FairMqTransitioner),
}

impl Transitioner {
    /// Transitioner for a controllable mode; non-controllable modes get the direct one.
    pub fn for_mode(mode: ControlMode) -> Self {
        match mode {
            ControlMode::Fairmq => Transitioner::FairMq(FairMqTransitioner),
            _ => Transitioner::Direct(DirectTransitioner),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transitioner::Direct(_) => "direct",
            Transitioner::FairMq(_) => "fairmq",
        }
    }

    /// Drive `req` through `link`, returning the generic state reached.
    pub async fn commit(&self, link: &dyn DeviceLink, req: &TransitionRequest) -> CommitResult {
        match self {
            Transitioner::Direct(t) => t.commit(link, req).await,
            Transitioner::FairMq(t) => t.commit(link, req).await,
        }
    }

    pub fn from_device_state(&self, state: &DeviceState) -> GenericState {
        match self {
            Transitioner::Direct(t) => t.from_device_state(state),
            Transitioner::FairMq(t) => t.from_device_state(state),
        }
    }

    pub fn to_device_state(&self, state: &GenericState) -> DeviceState {
        match self {
            Transitioner::Direct(t) => t.to_device_state(state),
            Transitioner::FairMq(t) => t.to_device_state(state),
        }
    }
}

#[cfg(test)]
pub(crate) mod script {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;

    /// A device link answering from a fixed list of replies, recording every step.
    pub(crate) struct ScriptedLink {
        replies: Mutex<VecDeque<Result<&'static str, &'static str>>>,
        pub(crate) steps: Mutex<Vec<DeviceTransition>>,
    }

    impl ScriptedLink {
        /// `Ok(state)` is a successful step, `Err(state)` a rejected step that left the device in `state`.
        pub(crate) fn new(replies: Vec<Result<&'static str, &'static str>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                steps: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn events(&self) -> Vec<String> {
            self.steps.lock().unwrap().iter().map(|s| s.event.clone()).collect()
        }
    }

    #[async_trait]
    impl DeviceLink for ScriptedLink {
        async fn transition(&self, step: DeviceTransition) -> Result<DeviceState, ControlError> {
            self.steps.lock().unwrap().push(step);
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(state)) => Ok(DeviceState::from_static(state)),
                Some(Err(state)) => Err(ControlError::Transition {
                    state: DeviceState::from_static(state),
                    reason: "scripted rejection".into(),
                }),
                None => Err(ControlError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_by_mode() {
        assert_eq!(Transitioner::for_mode(ControlMode::Fairmq).name(), "fairmq");
        assert_eq!(Transitioner::for_mode(ControlMode::Direct).name(), "direct");
        assert_eq!(Transitioner::for_mode(ControlMode::Basic).name(), "direct");
    }

    #[test]
    fn commit_error_displays_inner_error() {
        let err = CommitError {
            state: GenericState::STANDBY,
            error: ControlError::Closed,
        };
        assert_eq!(err.to_string(), "control link is closed");
    }
}
