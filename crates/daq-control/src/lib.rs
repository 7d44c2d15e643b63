//! Control path of controllable tasks.
//!
//! - [`ControlClient`] speaks the OCC gRPC protocol to a task's loopback control port.
//! - [`Transitioner`] maps the generic lifecycle onto the device's own machine and drives the
//!   required device events through any [`DeviceLink`].
pub mod proto {
    tonic::include_proto!("occ.v1");
}

mod error;
pub use error::{ControlError, ControlResult};

pub mod transitioner;
pub use transitioner::{
    CommitError, CommitResult, DeviceLink, DeviceTransition, DirectTransitioner,
    FairMqTransitioner, Transitioner,
};

mod client;
pub use client::{ControlClient, DeviceEventStream, DeviceStatus};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
