use std::time::Duration;

use daq_model::{DeviceState, GenericState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("invalid control endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to connect to control endpoint: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),

    #[error("dialing {endpoint} timed out after {timeout:?}: {last_error}")]
    DialTimeout {
        endpoint: String,
        timeout: Duration,
        last_error: String,
    },

    #[error("occ call returned {code:?}: {message}")]
    GrpcStatus {
        code: tonic::Code,
        message: String,
        #[source]
        status: Box<tonic::Status>,
    },

    #[error("control link is closed")]
    Closed,

    #[error("{call} timed out after {timeout:?}")]
    CallTimeout {
        call: &'static str,
        timeout: Duration,
    },

    #[error("task did not reach {expected} within {timeout:?} (last state {last})")]
    ReadinessTimeout {
        expected: GenericState,
        last: GenericState,
        timeout: Duration,
    },

    #[error("task reached {0} during startup")]
    StartupFailed(GenericState),

    /// The device answered, but not with the requested outcome.
    #[error("transition unsuccessful: {reason}")]
    Transition { state: DeviceState, reason: String },

    #[error("transition {event} impossible")]
    Impossible { event: String },
}

impl ControlError {
    /// Device state carried by a rejected transition; empty for every other error.
    pub fn reached_state(&self) -> DeviceState {
        match self {
            ControlError::Transition { state, .. } => state.clone(),
            _ => DeviceState::from_static(""),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ControlError::GrpcStatus { code: tonic::Code::Unavailable, .. })
    }
}

impl From<tonic::Status> for ControlError {
    fn from(status: tonic::Status) -> Self {
        ControlError::GrpcStatus {
            code: status.code(),
            message: status.message().to_string(),
            status: Box::new(status),
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
