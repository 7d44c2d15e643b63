//! Logging bootstrap for the executor daemon.
//!
//! Every crate in the workspace logs through `tracing`; this crate only decides
//! where those events end up (human readable text, JSON lines, or journald).
mod logger;
pub use logger::*;
