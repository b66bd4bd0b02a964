//! Hook program invocation (§6): four slots, each run as
//! `<program> <username> <message> <original-command-line>`.
//! `validate_rootexec`/`validate_exec` run before the syscall and abort
//! the request on non-zero exit; `success_rootexec`/`success_exec` run
//! after, with the exit status logged but not acted upon.

use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::error::{CoreError, Result};
use crate::privilege::{PrivilegeGate, SanitizedEnv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    ValidateRootExec,
    ValidateExec,
    SuccessRootExec,
    SuccessExec,
}

impl HookKind {
    fn aborts_on_failure(&self) -> bool {
        matches!(self, HookKind::ValidateRootExec | HookKind::ValidateExec)
    }

    /// `*_rootexec` hooks run with effective UID 0 (§6); `*_exec` hooks run
    /// at the caller's real UID.
    fn runs_elevated(&self) -> bool {
        matches!(self, HookKind::ValidateRootExec | HookKind::SuccessRootExec)
    }
}

/// Runs one hook program if configured. `validate_*` failures surface as
/// an error; `success_*` failures are only logged. `*_rootexec` hooks run
/// with effective UID 0, narrowly elevated for the duration of the child
/// process and dropped again as soon as it exits.
pub fn run_hook(
    kind: HookKind,
    program: Option<&str>,
    username: &str,
    message: &str,
    original_command_line: &str,
    env: &SanitizedEnv,
    gate: &PrivilegeGate,
) -> Result<()> {
    let Some(program) = program else {
        return Ok(());
    };

    let _guard = if kind.runs_elevated() {
        Some(gate.elevate()?)
    } else {
        None
    };

    let mut command = Command::new(program);
    command
        .arg0(program)
        .arg(username)
        .arg(message)
        .arg(original_command_line)
        .env_clear()
        .envs(env.iter());

    let status = command.status();

    match status {
        Ok(status) if status.success() => {
            tracing::debug!(?kind, program, "hook succeeded");
            Ok(())
        }
        Ok(status) => {
            if kind.aborts_on_failure() {
                Err(CoreError::ExternalFailure {
                    utility: program.to_string(),
                    exit_code: status.code(),
                    stderr: format!("{kind:?} exited non-zero"),
                })
            } else {
                tracing::warn!(?kind, program, code = ?status.code(), "hook exited non-zero, ignored");
                Ok(())
            }
        }
        Err(e) => {
            if kind.aborts_on_failure() {
                Err(CoreError::ExternalFailure {
                    utility: program.to_string(),
                    exit_code: None,
                    stderr: e.to_string(),
                })
            } else {
                tracing::warn!(?kind, program, error = %e, "hook failed to spawn, ignored");
                Ok(())
            }
        }
    }
}

/// Runs `validate_rootexec` then `validate_exec`, per §4.5's ordering.
/// Either non-zero exit aborts the request.
pub fn run_validate_hooks(
    validate_rootexec: Option<&str>,
    validate_exec: Option<&str>,
    username: &str,
    message: &str,
    original_command_line: &str,
    env: &SanitizedEnv,
    gate: &PrivilegeGate,
) -> Result<()> {
    run_hook(
        HookKind::ValidateRootExec,
        validate_rootexec,
        username,
        message,
        original_command_line,
        env,
        gate,
    )?;
    run_hook(
        HookKind::ValidateExec,
        validate_exec,
        username,
        message,
        original_command_line,
        env,
        gate,
    )
}

/// Runs `success_rootexec` then `success_exec`. Never aborts the request;
/// failures are logged only.
pub fn run_success_hooks(
    success_rootexec: Option<&str>,
    success_exec: Option<&str>,
    username: &str,
    message: &str,
    original_command_line: &str,
    env: &SanitizedEnv,
    gate: &PrivilegeGate,
) {
    let _ = run_hook(
        HookKind::SuccessRootExec,
        success_rootexec,
        username,
        message,
        original_command_line,
        env,
        gate,
    );
    let _ = run_hook(
        HookKind::SuccessExec,
        success_exec,
        username,
        message,
        original_command_line,
        env,
        gate,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn is_command_in_path(program: &str) -> bool {
        if let Ok(path) = env::var("PATH") {
            for p in path.split(':') {
                if fs::metadata(format!("{p}/{program}")).is_ok() {
                    return true;
                }
            }
        }
        false
    }

    fn test_env() -> SanitizedEnv {
        let mut map = std::collections::HashMap::new();
        map.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        SanitizedEnv::for_test(map)
    }

    #[test]
    fn no_hook_configured_is_a_no_op() {
        let env = test_env();
        let gate = PrivilegeGate::init().unwrap();
        assert!(run_hook(HookKind::ValidateExec, None, "alice", "mount", "udevil /dev/sdb1", &env, &gate).is_ok());
    }

    #[test]
    fn validate_hook_failure_aborts() {
        if !is_command_in_path("false") {
            return;
        }
        let env = test_env();
        let gate = PrivilegeGate::init().unwrap();
        let result = run_hook(
            HookKind::ValidateExec,
            Some("false"),
            "alice",
            "mount",
            "udevil /dev/sdb1",
            &env,
            &gate,
        );
        assert!(result.is_err());
    }

    #[test]
    fn success_hook_failure_does_not_abort() {
        if !is_command_in_path("false") {
            return;
        }
        let env = test_env();
        let gate = PrivilegeGate::init().unwrap();
        let result = run_hook(
            HookKind::SuccessExec,
            Some("false"),
            "alice",
            "mount",
            "udevil /dev/sdb1",
            &env,
            &gate,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rootexec_hook_requires_setuid_root_to_elevate() {
        // Under the unprivileged test harness the gate cannot elevate, so a
        // configured rootexec hook must fail closed rather than silently
        // running at the caller's own UID.
        let env = test_env();
        let gate = PrivilegeGate::init().unwrap();
        if gate.is_setuid_root() {
            return;
        }
        let result = run_hook(
            HookKind::ValidateRootExec,
            Some("true"),
            "alice",
            "mount",
            "udevil /dev/sdb1",
            &env,
            &gate,
        );
        assert!(result.is_err());
    }
}
