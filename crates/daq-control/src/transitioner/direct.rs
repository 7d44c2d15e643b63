use daq_model::{DeviceState, GenericState, TransitionRequest};

use super::{CommitError, CommitResult, DeviceLink, DeviceTransition};

/// Devices that implement the generic state machine as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectTransitioner;

impl DirectTransitioner {
    pub async fn commit(&self, link: &dyn DeviceLink, req: &TransitionRequest) -> CommitResult {
        let step = DeviceTransition::new(
            req.event.clone(),
            self.to_device_state(&req.source),
            self.to_device_state(&req.destination),
        )
        .with_arguments(req.arguments.clone());

        match link.transition(step).await {
            Ok(state) => Ok(self.from_device_state(&state)),
            Err(error) => Err(CommitError {
                state: self.from_device_state(&error.reached_state()),
                error,
            }),
        }
    }

    pub fn from_device_state(&self, state: &DeviceState) -> GenericState {
        if state.as_str().is_empty() {
            return GenericState::UNKNOWN;
        }
        GenericState::new(state.as_str())
    }

    pub fn to_device_state(&self, state: &GenericState) -> DeviceState {
        DeviceState::new(state.as_str())
    }
}
