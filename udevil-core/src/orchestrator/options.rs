//! Options assembly (§4.5): builds the final `-o` string passed to the
//! mount utility from policy defaults, the caller's requested options, and
//! per-filesystem synthesis for network shares.

use nix::unistd::{Gid, Uid};

use crate::classify::{NetworkFsType, ParsedNetworkUrl};
use crate::policy::PolicySnapshot;

pub const BUILTIN_DEFAULT_OPTIONS: &str = "nosuid,noexec,nodev,user=$USER,uid=$UID,gid=$GID";

pub struct OptionsInput<'a> {
    pub policy: &'a PolicySnapshot,
    pub fstype: &'a str,
    pub user_options: Option<&'a str>,
    pub network: Option<&'a ParsedNetworkUrl>,
    pub opened_read_only: bool,
    pub caller_uid: Uid,
    pub caller_gid: Gid,
    pub username: &'a str,
}

/// True iff the caller's requested options contain the literal `remount`.
pub fn is_remount(user_options: Option<&str>) -> bool {
    user_options
        .map(|o| o.split(',').map(str::trim).any(|opt| opt == "remount"))
        .unwrap_or(false)
}

fn expand(s: &str, username: &str, uid: Uid, gid: Gid) -> String {
    s.replace("$USER", username)
        .replace("$UID", &uid.to_string())
        .replace("$GID", &gid.to_string())
}

/// Assembles the option string per §4.5: `remount` bypasses everything
/// below and is used verbatim (after variable expansion); otherwise starts
/// from `default_options` (policy-configured or the built-in), appends the
/// caller's options, then network-type-specific synthesized options, then
/// `ro` if the backing file was opened read-only, and finally expands
/// `$UID`/`$GID`/`$USER`.
pub fn assemble(input: &OptionsInput) -> String {
    if is_remount(input.user_options) {
        return expand(
            input.user_options.unwrap_or_default(),
            input.username,
            input.caller_uid,
            input.caller_gid,
        );
    }

    let mut parts: Vec<String> = Vec::new();

    let base = input
        .policy
        .lookup("default_options", Some(input.fstype))
        .unwrap_or(BUILTIN_DEFAULT_OPTIONS);
    parts.extend(
        base.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from),
    );

    if let Some(user_opts) = input.user_options {
        parts.extend(
            user_opts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
    }

    if let Some(url) = input.network {
        parts.extend(synthesize_network_options(url));
    }

    if input.opened_read_only {
        parts.push("ro".to_string());
    }

    expand(&parts.join(","), input.username, input.caller_uid, input.caller_gid)
}

/// Per-filesystem option synthesis table from §4.5.
pub fn synthesize_network_options(url: &ParsedNetworkUrl) -> Vec<String> {
    match url.fstype {
        NetworkFsType::Ftpfs => {
            let mut opts = vec![format!("ip={}", url.address)];
            if let Some(u) = &url.user {
                opts.push(format!("user={u}"));
            }
            if let Some(p) = &url.password {
                opts.push(format!("pass=\"{p}\""));
            }
            if let Some(port) = url.port {
                opts.push(format!("port={port}"));
            }
            if url.path != "/" {
                opts.push(format!("root=\"{}\"", url.path));
            }
            opts
        }
        NetworkFsType::Curlftpfs => {
            vec![format!(
                "user={}:{}",
                url.user.as_deref().unwrap_or_default(),
                url.password.as_deref().unwrap_or_default()
            )]
        }
        NetworkFsType::Nfs => url.port.map(|p| vec![format!("port={p}")]).unwrap_or_default(),
        NetworkFsType::Cifs | NetworkFsType::Smbfs => {
            let mut opts = Vec::new();
            if let Some(u) = &url.user {
                match u.split_once('/') {
                    Some((domain, user)) => {
                        opts.push(format!("user={user}"));
                        opts.push(format!("domain={domain}"));
                    }
                    None => opts.push(format!("user={u}")),
                }
            }
            if let Some(p) = &url.password {
                opts.push(format!("password={p}"));
            }
            if let Some(port) = url.port {
                opts.push(format!("port={port}"));
            }
            opts
        }
        NetworkFsType::Sshfs => url.port.map(|p| vec![format!("port={p}")]).unwrap_or_default(),
        NetworkFsType::Davfs | NetworkFsType::Fuse => Vec::new(),
    }
}

/// Remount is rejected for network types ftpfs/curlftpfs/sshfs; it
/// requires an existing mount specified by device or network URL. Plain
/// files are rejected separately by the caller, since `fstype` alone
/// (the `"file"` sentinel) can't be told apart from a real filesystem
/// type override once resolved.
pub fn remount_allowed_for(fstype: &str) -> bool {
    !matches!(fstype, "ftpfs" | "curlftpfs" | "sshfs")
}
