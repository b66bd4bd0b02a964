//! The three policy primitives from the design: list-match, group-match,
//! option-check. All operate on an already-expanded [`PolicySnapshot`].

use nix::unistd::Uid;

use super::config::PolicySnapshot;

/// Path-style glob match: `*` and `?` do not cross `/`. The literal
/// pattern `*` matches anything, including an empty candidate.
fn glob_match_path(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    glob_match(pattern.as_bytes(), candidate.as_bytes())
}

fn glob_match(pattern: &[u8], candidate: &[u8]) -> bool {
    match (pattern.first(), candidate.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            // `*` does not cross `/`: try consuming zero or more non-slash
            // candidate bytes.
            let mut i = 0;
            loop {
                if glob_match(&pattern[1..], &candidate[i..]) {
                    return true;
                }
                if i >= candidate.len() || candidate[i] == b'/' {
                    return false;
                }
                i += 1;
            }
        }
        (Some(b'?'), Some(c)) if *c != b'/' => glob_match(&pattern[1..], &candidate[1..]),
        (Some(p), Some(c)) if p == c => glob_match(&pattern[1..], &candidate[1..]),
        _ => false,
    }
}

/// **list-match**(category, type-scope, candidate): look up
/// `category_<type-scope>` first, falling back to `category`; split on
/// commas, trim whitespace, glob-match each pattern. Returns true on the
/// first match. An unconfigured category matches nothing.
pub fn list_match(policy: &PolicySnapshot, category: &str, type_scope: Option<&str>, candidate: &str) -> bool {
    let Some(list) = policy.lookup(category, type_scope) else {
        return false;
    };
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|pattern| glob_match_path(pattern, candidate))
}

/// **group-match**(category, type-scope, username): like list-match but
/// each pattern names a Unix group; the pattern `root` matches exactly
/// when the effective UID is 0.
pub fn group_match(
    policy: &PolicySnapshot,
    category: &str,
    type_scope: Option<&str>,
    username: &str,
    user_groups: &[String],
    effective_uid: Uid,
) -> bool {
    let Some(list) = policy.lookup(category, type_scope) else {
        return false;
    };
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|pattern| {
            if pattern == "root" && effective_uid.is_root() {
                return true;
            }
            let _ = username;
            user_groups.iter().any(|g| glob_match_path(pattern, g))
        })
}

/// **option-check**(category, type-scope, options): split on commas;
/// return the first option not matched by `list_match`, if any.
pub fn option_check<'a>(
    policy: &PolicySnapshot,
    category: &str,
    type_scope: Option<&str>,
    options: &'a str,
) -> Option<&'a str> {
    options
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .find(|option| !list_match(policy, category, type_scope, option))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Gid;

    fn policy(src: &str) -> PolicySnapshot {
        PolicySnapshot::from_str(src, Uid::from_raw(1000), Gid::from_raw(1000), "alice").unwrap()
    }

    #[test]
    fn star_matches_anything() {
        let p = policy("allowed_types = *\n");
        assert!(list_match(&p, "allowed_types", None, "vfat"));
        assert!(list_match(&p, "allowed_types", None, ""));
    }

    #[test]
    fn glob_does_not_cross_slash() {
        let p = policy("allowed_media_dirs = /media/*\n");
        assert!(list_match(&p, "allowed_media_dirs", None, "/media/usb"));
        assert!(!list_match(&p, "allowed_media_dirs", None, "/media/usb/nested"));
    }

    #[test]
    fn unconfigured_category_matches_nothing() {
        let p = policy("allowed_types = vfat\n");
        assert!(!list_match(&p, "allowed_users", None, "alice"));
    }

    #[test]
    fn group_root_pattern_matches_only_when_effective_uid_zero() {
        let p = policy("allowed_groups = root\n");
        assert!(group_match(
            &p,
            "allowed_groups",
            None,
            "root",
            &[],
            Uid::from_raw(0)
        ));
        assert!(!group_match(
            &p,
            "allowed_groups",
            None,
            "alice",
            &[],
            Uid::from_raw(1000)
        ));
    }

    #[test]
    fn option_check_returns_first_non_matching() {
        let p = policy("allowed_options = nosuid,noexec,nodev\n");
        assert_eq!(
            option_check(&p, "allowed_options", None, "nosuid,exec,nodev"),
            Some("exec")
        );
        assert_eq!(
            option_check(&p, "allowed_options", None, "nosuid,noexec,nodev"),
            None
        );
    }
}
