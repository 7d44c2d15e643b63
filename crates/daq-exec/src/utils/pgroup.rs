//! Process-group placement and signaling for task commands.
//!
//! ## Overview
//!
//! Every task command is moved into a fresh process group right before `execve()`, so the
//! containing shell and all of its children can be signaled as one unit through the negative
//! group id.
//! - The `pre_exec` hook runs in the forked child: only async-signal-safe calls are made there.
//! - On Linux the child additionally asks for `SIGKILL` when the executor dies, so a crashed
//!   executor does not leave orphaned tasks behind.
//!
//! Killing is always `SIGKILL`. There is no `SIGTERM` grace step.
use std::io;

use tokio::process::Command;
use tracing::trace;

use crate::error::ExecError;

/// A process group created for one task command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: i32,
}

impl ProcessGroup {
    /// The group led by `pid` (the spawned command calls `setpgid(0, 0)`).
    pub fn led_by(pid: u32) -> Self {
        Self { pgid: pid as i32 }
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    /// Send `SIGKILL` to every process in the group.
    pub fn kill(&self) -> Result<(), ExecError> {
        trace!(target: "daq.exec", pgid = self.pgid, "sending SIGKILL to process group");
        signal_group(self.pgid, libc::SIGKILL)
    }

    /// `true` while at least one process of the group exists.
    pub fn is_alive(&self) -> bool {
        signal_group(self.pgid, 0).is_ok()
    }
}

fn signal_group(pgid: i32, sig: libc::c_int) -> Result<(), ExecError> {
    if pgid <= 0 {
        return Err(ExecError::Signal {
            pgid,
            reason: "refusing to signal a non-positive process group".into(),
        });
    }
    let rc = unsafe { libc::kill(-pgid, sig) };
    if rc != 0 {
        return Err(ExecError::Signal {
            pgid,
            reason: io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

/// Attach the process-group hook to `cmd`.
pub fn attach_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) != 0
                {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}
