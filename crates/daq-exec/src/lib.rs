//! Process supervisor for executor tasks.
//!
//! Spawns a task command in its own process group, captures its output and
//! exposes wait/kill primitives. The kill side can pre-record the intended
//! final state in a single-slot channel so the wait side can tell a voluntary
//! exit from a forced one.
mod error;
pub use error::ExecError;

mod pending;
pub use pending::{PendingRx, PendingTx, pending_slot};

pub mod proc;
pub use proc::{ExitCause, ProcessControl, ProcessExit, ProcessWaiter, SpawnOptions, spawn};

mod utils;
pub use utils::pgroup::ProcessGroup;

