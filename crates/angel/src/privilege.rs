//! Switching the angel to an unprivileged user after the handshake.
//!
//! Order matters: supplementary groups, then gid, then uid. Once the uid is
//! gone the process can no longer change its groups.

use nix::errno::Errno;
use nix::unistd::{Gid, Uid, User, setgid, setuid};

/// Result of a privilege drop attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// Now running as the target user.
    Success,
    /// The angel lacks the privilege to switch users (not started as root).
    Permission,
    /// Anything else; fatal to the angel.
    Failed(String),
}

pub trait PrivilegeDropper: Send + Sync {
    fn set_user(&self, user: &str) -> DropOutcome;
}

/// Drops privileges with setgroups/setgid/setuid.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPrivilegeDropper;

impl PrivilegeDropper for OsPrivilegeDropper {
    fn set_user(&self, user: &str) -> DropOutcome {
        let account = match User::from_name(user) {
            Ok(Some(account)) => account,
            Ok(None) => return DropOutcome::Failed(format!("no such user [{user}]")),
            Err(e) => return DropOutcome::Failed(format!("user lookup failed: {e}")),
        };

        if let Err(outcome) = switch_ids(account.uid, account.gid) {
            return outcome;
        }
        tracing::info!(user, uid = account.uid.as_raw(), gid = account.gid.as_raw(), "Switched user");
        DropOutcome::Success
    }
}

fn switch_ids(uid: Uid, gid: Gid) -> Result<(), DropOutcome> {
    #[cfg(target_os = "linux")]
    nix::unistd::setgroups(&[gid]).map_err(|e| classify("setgroups", e))?;
    setgid(gid).map_err(|e| classify("setgid", e))?;
    setuid(uid).map_err(|e| classify("setuid", e))?;
    Ok(())
}

fn classify(call: &str, errno: Errno) -> DropOutcome {
    if errno == Errno::EPERM {
        DropOutcome::Permission
    } else {
        DropOutcome::Failed(format!("{call} failed: {errno}"))
    }
}
