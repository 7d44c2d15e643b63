//! Plain data shared by every layer of the executor.
//!
//! Nothing in here performs I/O: task descriptors, the two state spaces
//! (generic and device), statuses, device events, control-plane commands
//! and the frames exchanged with the cluster manager.
mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;
