//! Component A: the privilege gate.
//!
//! Records the process's original real/effective identity at startup,
//! drops to the caller's real UID/GID immediately, and exposes narrow,
//! paired `elevate()`/`drop()` operations around the privileged regions
//! (directory creation under an allowed media directory, invoking mount,
//! unmount, losetup and setfacl, writing the mount-point marker).

use nix::unistd::{self, Gid, Group, Uid, User};
use std::collections::HashMap;
use std::ffi::OsString;

use crate::error::{CoreError, Result};

/// The fixed environment whitelist from the design: `PATH` reset to a
/// system default, `IFS` reset to the three whitespace characters, and
/// the listed locale variables preserved if present in the inherited
/// environment.
const SANITIZED_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const SANITIZED_IFS: &str = " \t\n";
const PRESERVED_LOCALE_VARS: &[&str] = &["TZ", "LANG", "LC_ALL", "LC_COLLATE", "LC_CTYPE"];

#[derive(Debug, Clone)]
pub struct SanitizedEnv(HashMap<String, String>);

impl SanitizedEnv {
    fn capture() -> Self {
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), SANITIZED_PATH.to_string());
        env.insert("IFS".to_string(), SANITIZED_IFS.to_string());
        for var in PRESERVED_LOCALE_VARS {
            if let Ok(value) = std::env::var(var) {
                env.insert((*var).to_string(), value);
            }
        }
        SanitizedEnv(env)
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    #[cfg(test)]
    pub(crate) fn for_test(map: HashMap<String, String>) -> Self {
        SanitizedEnv(map)
    }
}

/// Snapshot of the process's original identity, taken once at startup
/// before the gate drops to the caller's real identity.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub real_uid: Uid,
    pub real_gid: Gid,
    pub effective_uid: Uid,
    pub effective_gid: Gid,
}

pub struct PrivilegeGate {
    original: Identity,
    supplementary_groups: Vec<Gid>,
    sanitized_env: SanitizedEnv,
    setuid_root: bool,
}

impl PrivilegeGate {
    /// Captures the process's original identity and immediately drops
    /// effective privilege to the real UID/GID, sanitizing the environment.
    /// Must be called exactly once, at process start.
    pub fn init() -> Result<Self> {
        let original = Identity {
            real_uid: unistd::getuid(),
            real_gid: unistd::getgid(),
            effective_uid: unistd::geteuid(),
            effective_gid: unistd::getegid(),
        };

        let setuid_root = original.effective_uid.is_root() && !original.real_uid.is_root();

        let supplementary_groups = current_user_groups(original.real_uid)?;
        let sanitized_env = SanitizedEnv::capture();

        let gate = PrivilegeGate {
            original,
            supplementary_groups,
            sanitized_env,
            setuid_root,
        };

        if setuid_root {
            unistd::seteuid(original.real_uid).map_err(CoreError::from)?;
        }

        Ok(gate)
    }

    pub fn identity(&self) -> Identity {
        self.original
    }

    pub fn supplementary_groups(&self) -> &[Gid] {
        &self.supplementary_groups
    }

    pub fn sanitized_env(&self) -> &SanitizedEnv {
        &self.sanitized_env
    }

    pub fn is_setuid_root(&self) -> bool {
        self.setuid_root
    }

    /// Restores effective UID 0 plus the original effective GID. Returns a
    /// guard that restores the caller's real identity on drop, so every
    /// elevation is statically paired with a matching `drop()`.
    pub fn elevate(&self) -> Result<ElevatedGuard<'_>> {
        if !self.setuid_root {
            return Err(CoreError::InvariantBroken(
                "process is not installed setuid-root".to_string(),
            ));
        }
        unistd::seteuid(Uid::from_raw(0)).map_err(CoreError::from)?;
        unistd::setegid(self.original.effective_gid).map_err(CoreError::from)?;
        Ok(ElevatedGuard { gate: self })
    }

    /// Like [`elevate`](Self::elevate), but also sets the *real* UID/GID to
    /// root, for invoking external utilities (mount/umount/losetup/setfacl)
    /// that inspect the real UID.
    pub fn elevate_real(&self) -> Result<ElevatedGuard<'_>> {
        if !self.setuid_root {
            return Err(CoreError::InvariantBroken(
                "process is not installed setuid-root".to_string(),
            ));
        }
        unistd::setresuid(Uid::from_raw(0), Uid::from_raw(0), self.original.real_uid)
            .map_err(CoreError::from)?;
        unistd::setresgid(
            self.original.effective_gid,
            self.original.effective_gid,
            self.original.real_gid,
        )
        .map_err(CoreError::from)?;
        Ok(ElevatedGuard { gate: self })
    }

    fn drop_to_caller(&self) {
        let _ = unistd::setresuid(
            self.original.real_uid,
            self.original.real_uid,
            self.original.real_uid,
        );
        let _ = unistd::setresgid(
            self.original.real_gid,
            self.original.real_gid,
            self.original.real_gid,
        );
    }
}

/// RAII guard returned by [`PrivilegeGate::elevate`]/[`elevate_real`]. Drops
/// back to the caller's real identity when it goes out of scope, on every
/// exit path including early returns and unwinds.
#[must_use = "the elevation is dropped as soon as this guard is dropped"]
pub struct ElevatedGuard<'a> {
    gate: &'a PrivilegeGate,
}

impl Drop for ElevatedGuard<'_> {
    fn drop(&mut self) {
        self.gate.drop_to_caller();
    }
}

fn current_user_groups(uid: Uid) -> Result<Vec<Gid>> {
    let user = User::from_uid(uid)
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::InvariantBroken(format!("no passwd entry for uid {uid}")))?;
    let group_names = unistd::getgrouplist(
        &std::ffi::CString::new(user.name.as_bytes()).unwrap_or_default(),
        user.gid,
    )
    .map_err(CoreError::from)?;
    Ok(group_names)
}

pub fn group_name(gid: Gid) -> Option<OsString> {
    Group::from_gid(gid)
        .ok()
        .flatten()
        .map(|g| OsString::from(g.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_env_always_has_path_and_ifs() {
        let env = SanitizedEnv::capture();
        assert_eq!(env.as_map().get("PATH").unwrap(), SANITIZED_PATH);
        assert_eq!(env.as_map().get("IFS").unwrap(), SANITIZED_IFS);
    }

    #[test]
    fn non_setuid_process_reports_not_setuid_root() {
        // When tests run unprivileged (the common case), effective and
        // real uid are equal, so the gate must not claim setuid-root.
        if unistd::geteuid().is_root() {
            return;
        }
        let gate = PrivilegeGate::init().expect("init should succeed even unprivileged");
        assert!(!gate.is_setuid_root());
        assert!(gate.elevate().is_err());
    }
}
