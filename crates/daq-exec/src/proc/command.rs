use std::process::Stdio;

use daq_model::{Command as TaskCommand, TaskId};
use tokio::process::Command;
use tracing::{trace, warn};

use crate::{
    error::ExecError,
    utils::{pgroup::attach_process_group, user},
};

const SHELL: &str = "/bin/sh";

/// Build the OS command for a task.
///
/// Shell commands run as `/bin/sh -c "<value> <args...>"`, everything else is exec'd directly.
/// The environment is inherited and extended with the task's `KEY=VALUE` overrides.
pub(crate) fn build(task_id: &TaskId, task_cmd: &TaskCommand) -> Result<Command, ExecError> {
    if task_cmd.value.trim().is_empty() {
        return Err(ExecError::InvalidCommand("empty command value".into()));
    }

    let mut cmd = if task_cmd.shell {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(task_cmd.display_line());
        cmd
    } else {
        let mut cmd = Command::new(&task_cmd.value);
        cmd.args(&task_cmd.arguments);
        cmd
    };

    let (env, rejected) = task_cmd.env_pairs();
    for entry in rejected {
        warn!(target: "daq.exec", %task_id, %entry, "ignoring malformed environment entry");
    }
    cmd.envs(env);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    attach_process_group(&mut cmd);

    if let Some(name) = &task_cmd.user {
        let creds = user::lookup(name)?;
        trace!(
            target: "daq.exec",
            %task_id,
            user = %name,
            uid = creds.uid,
            gid = creds.gid,
            groups = ?creds.groups,
            "custom credentials set"
        );
        user::attach_credentials(&mut cmd, creds);
    }

    Ok(cmd)
}
