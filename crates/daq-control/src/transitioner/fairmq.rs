use std::collections::HashMap;

use daq_model::{DeviceState, GenericState, TransitionRequest};
use tracing::{error, warn};

use super::{CommitError, CommitResult, DeviceLink, DeviceTransition};
use crate::error::ControlError;

const IDLE: DeviceState = DeviceState::from_static("IDLE");
const READY: DeviceState = DeviceState::from_static("READY");
const RUNNING: DeviceState = DeviceState::from_static("RUNNING");
const ERROR: DeviceState = DeviceState::from_static("ERROR");
const EXITING: DeviceState = DeviceState::from_static("EXITING");
/// Between IDLE and READY; never visible to the generic caller.
const DEVICE_READY: DeviceState = DeviceState::from_static("DEVICE READY");
const NO_STATE: DeviceState = DeviceState::from_static("");

const EVT_INIT_DEVICE: &str = "INIT DEVICE";
const EVT_INIT_TASK: &str = "INIT TASK";
const EVT_RUN: &str = "RUN";
const EVT_STOP: &str = "STOP";
const EVT_RESET_TASK: &str = "RESET TASK";
const EVT_RESET_DEVICE: &str = "RESET DEVICE";
const EVT_END: &str = "END";

const STATE_MAP: [(GenericState, DeviceState); 5] = [
    (GenericState::STANDBY, IDLE),
    (GenericState::CONFIGURED, READY),
    (GenericState::RUNNING, RUNNING),
    (GenericState::ERROR, ERROR),
    (GenericState::DONE, EXITING),
];

type StepOutcome = (DeviceState, Result<(), ControlError>);

/// FairMQ devices: some generic events expand into several device events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FairMqTransitioner;

impl FairMqTransitioner {
    pub async fn commit(&self, link: &dyn DeviceLink, req: &TransitionRequest) -> CommitResult {
        let src = &req.source;
        let dst = &req.destination;
        let args = &req.arguments;

        match req.event.as_str() {
            "START" => {
                let (state, res) = self.step(link, EVT_RUN, self.to_device_state(src), self.to_device_state(dst), args).await;
                self.finish(state, res)
            }
            "STOP" => {
                let (state, res) = self.step(link, EVT_STOP, self.to_device_state(src), self.to_device_state(dst), args).await;
                self.finish(state, res)
            }
            "RECOVER" | "GO_ERROR" => {
                error!(target: "daq.control", event = %req.event, "transition not implemented yet");
                Ok(src.clone())
            }
            "CONFIGURE" => self.configure(link, src, dst, args).await,
            "RESET" => self.reset(link, src, dst, args).await,
            "EXIT" => self.exit(link, src, dst, args).await,
            other => {
                error!(target: "daq.control", event = %other, %src, "transition impossible");
                Err(CommitError {
                    state: src.clone(),
                    error: ControlError::Impossible {
                        event: other.to_string(),
                    },
                })
            }
        }
    }

    async fn configure(
        &self,
        link: &dyn DeviceLink,
        src: &GenericState,
        dst: &GenericState,
        args: &HashMap<String, String>,
    ) -> CommitResult {
        let src_dev = self.to_device_state(src);

        let (state, res) = self.step(link, EVT_INIT_DEVICE, src_dev.clone(), DEVICE_READY, args).await;
        if state != DEVICE_READY {
            return self.finish(state, res);
        }

        let (mut state, res) = self
            .step(link, EVT_INIT_TASK, DEVICE_READY, self.to_device_state(dst), &HashMap::new())
            .await;
        if state == DEVICE_READY {
            warn!(target: "daq.control", "stuck in DEVICE READY during configure; rolling back");
            (state, _) = self
                .step(link, EVT_RESET_DEVICE, DEVICE_READY, src_dev, &HashMap::new())
                .await;
        }
        self.finish(state, res)
    }

    async fn reset(
        &self,
        link: &dyn DeviceLink,
        src: &GenericState,
        dst: &GenericState,
        args: &HashMap<String, String>,
    ) -> CommitResult {
        let src_dev = self.to_device_state(src);

        let (state, res) = self
            .step(link, EVT_RESET_TASK, src_dev.clone(), DEVICE_READY, &HashMap::new())
            .await;
        if state != DEVICE_READY {
            return self.finish(state, res);
        }

        let (mut state, res) = self
            .step(link, EVT_RESET_DEVICE, DEVICE_READY, self.to_device_state(dst), args)
            .await;
        if state == DEVICE_READY {
            warn!(target: "daq.control", "stuck in DEVICE READY during reset; rolling forward");
            (state, _) = self
                .step(link, EVT_INIT_TASK, DEVICE_READY, src_dev, &HashMap::new())
                .await;
        }
        self.finish(state, res)
    }

    async fn exit(
        &self,
        link: &dyn DeviceLink,
        src: &GenericState,
        dst: &GenericState,
        args: &HashMap<String, String>,
    ) -> CommitResult {
        let mut src_dev = self.to_device_state(src);

        if *src == GenericState::CONFIGURED {
            let reset = self.reset(link, src, &GenericState::STANDBY, args).await;
            let reached = match &reset {
                Ok(state) => state,
                Err(e) => &e.state,
            };
            if *reached != GenericState::STANDBY {
                return reset;
            }
            src_dev = IDLE;
        }

        let (state, res) = self
            .step(link, EVT_END, src_dev, self.to_device_state(dst), args)
            .await;
        self.finish(state, res)
    }

    async fn step(
        &self,
        link: &dyn DeviceLink,
        event: &str,
        src: DeviceState,
        dst: DeviceState,
        args: &HashMap<String, String>,
    ) -> StepOutcome {
        let step = DeviceTransition::new(event, src, dst).with_arguments(args.clone());
        match link.transition(step).await {
            Ok(state) => (state, Ok(())),
            Err(e) => (e.reached_state(), Err(e)),
        }
    }

    fn finish(&self, state: DeviceState, res: Result<(), ControlError>) -> CommitResult {
        let state = self.from_device_state(&state);
        match res {
            Ok(()) => Ok(state),
            Err(error) => Err(CommitError { state, error }),
        }
    }

    pub fn from_device_state(&self, state: &DeviceState) -> GenericState {
        STATE_MAP
            .iter()
            .find(|(_, d)| d == state)
            .map(|(g, _)| g.clone())
            .unwrap_or(GenericState::UNKNOWN)
    }

    pub fn to_device_state(&self, state: &GenericState) -> DeviceState {
        STATE_MAP
            .iter()
            .find(|(g, _)| g == state)
            .map(|(_, d)| d.clone())
            .unwrap_or(NO_STATE)
    }
}
