use std::{ffi::CString, io};

use tokio::process::Command;

use crate::error::ExecError;

/// Credentials a task command is switched to before `execve()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub groups: Vec<libc::gid_t>,
}

/// Look up `name` in the user database.
pub fn lookup(name: &str) -> Result<Credentials, ExecError> {
    let cname = CString::new(name).map_err(|_| ExecError::UnknownUser(name.to_string()))?;

    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < 1 << 20 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc).into());
        }
        break;
    }
    if result.is_null() {
        return Err(ExecError::UnknownUser(name.to_string()));
    }

    let uid = pwd.pw_uid;
    let gid = pwd.pw_gid;
    Ok(Credentials {
        uid,
        gid,
        groups: supplementary_groups(&cname, gid),
    })
}

#[cfg(target_os = "linux")]
fn supplementary_groups(name: &CString, gid: libc::gid_t) -> Vec<libc::gid_t> {
    let mut count: libc::c_int = 32;
    loop {
        let mut groups: Vec<libc::gid_t> = vec![0; count as usize];
        let mut n = count;
        let rc = unsafe { libc::getgrouplist(name.as_ptr(), gid, groups.as_mut_ptr(), &mut n) };
        if rc >= 0 {
            groups.truncate(n.max(0) as usize);
            return groups;
        }
        if n <= count || count >= 65_536 {
            return vec![gid];
        }
        count = n;
    }
}

#[cfg(not(target_os = "linux"))]
fn supplementary_groups(_name: &CString, gid: libc::gid_t) -> Vec<libc::gid_t> {
    vec![gid]
}

/// Switch the child to `creds` right before `execve()`.
pub fn attach_credentials(cmd: &mut Command, creds: Credentials) {
    unsafe {
        cmd.pre_exec(move || {
            if libc::setgroups(creds.groups.len() as _, creds.groups.as_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::setgid(creds.gid) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::setuid(creds.uid) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_known() {
        let creds = lookup("root").unwrap();
        assert_eq!(creds.uid, 0);
        assert_eq!(creds.gid, 0);
        assert!(!creds.groups.is_empty());
    }

    #[test]
    fn unknown_user_is_reported() {
        let err = lookup("no-such-user-for-daq-tests").unwrap_err();
        assert!(matches!(err, ExecError::UnknownUser(u) if u == "no-such-user-for-daq-tests"));
    }

    #[test]
    fn interior_nul_is_unknown_user() {
        assert!(matches!(lookup("ro\0ot"), Err(ExecError::UnknownUser(_))));
    }
}
