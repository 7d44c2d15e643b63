//! Task lifecycle and routing for the executor.
//!
//! - [`Task`] is the closed set of lifecycle variants, built from a descriptor's control mode.
//! - [`Router`] owns the live-task table and serializes everything that touches it.
//! - [`Transport`] is the outbound side of the cluster manager link, supplied by the caller.
mod error;
pub use error::CoreError;

mod sink;
pub use sink::{EventReport, SinkReceivers, StatusReport, TaskSink, sink_channels};

mod timeouts;
pub use timeouts::Timeouts;

pub mod task;
pub use task::{BasicTask, ControllableTask, HookTask, Task, TransitionFailure};

mod transport;
pub use transport::{Transport, TransportError};

mod router;
pub use router::{Router, RouterConfig, TaskTable};

mod system;
pub use system::agent_id;
