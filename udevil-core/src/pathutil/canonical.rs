//! Component D (part 1): hardened canonicalization.
//!
//! A single primitive resolves all symlinks and requires the result to be
//! absolute. Every user-supplied path is canonicalized before any policy
//! decision, and again immediately before the privileged mount invocation;
//! any mismatch between the two is a fatal [`CoreError::InvalidPath`].

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Rejects embedded NUL/newline before calling `fs::canonicalize`, and
/// requires the resolved path to be absolute (rooted at `/`).
pub fn canonicalize_hardened(candidate: &str) -> Result<PathBuf> {
    if candidate.contains('\0') || candidate.contains('\n') || candidate.contains('\r') {
        return Err(CoreError::invalid_path(
            candidate,
            "path contains unsafe control characters",
        ));
    }

    let resolved = Path::new(candidate)
        .canonicalize()
        .map_err(|e| CoreError::invalid_path(candidate, format!("canonicalize failed: {e}")))?;

    if !resolved.is_absolute() {
        return Err(CoreError::invalid_path(
            &resolved,
            "canonicalized path is not absolute",
        ));
    }

    Ok(resolved)
}

/// The "re-check" from §4.4: any divergence between the realpath observed
/// before the policy gate and immediately before the privileged syscall is
/// fatal, not merely logged.
pub fn recheck_unchanged(pre_policy: &Path, pre_syscall: &Path) -> Result<()> {
    if pre_policy != pre_syscall {
        return Err(CoreError::invalid_path(
            pre_syscall,
            format!(
                "realpath changed between policy check ({}) and syscall ({})",
                pre_policy.display(),
                pre_syscall.display()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_embedded_newline() {
        let err = canonicalize_hardened("/tmp/evil\npath");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_nonexistent_path() {
        let err = canonicalize_hardened("/definitely/not/here/at/all");
        assert!(err.is_err());
    }

    #[test]
    fn resolves_symlinks_to_absolute_path() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target");
        fs::write(&target, b"x").unwrap();
        let link = tmp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let resolved = canonicalize_hardened(link.to_str().unwrap()).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, target.canonicalize().unwrap());
    }

    #[test]
    fn recheck_detects_divergence() {
        let a = Path::new("/media/a");
        let b = Path::new("/media/b");
        assert!(recheck_unchanged(a, a).is_ok());
        assert!(recheck_unchanged(a, b).is_err());
    }
}
