//! # udevil
//!
//! Thin CLI front-end over `udevil-core`: parses arguments and policy
//! configuration, wires together the privilege gate, policy snapshot,
//! device-info reader, mount table, and system-utility invoker, then
//! drives one mount or unmount through the orchestrator. Contains no
//! authorization logic of its own.

mod observability;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::User;

use udevil_core::deviceinfo::SysfsDeviceInfo;
use udevil_core::error::CoreError;
use udevil_core::mounttable::MountTable;
use udevil_core::orchestrator::{HookPrograms, Orchestrator, Outcome};
use udevil_core::policy::PolicySnapshot;
use udevil_core::privilege::{self, PrivilegeGate};
use udevil_core::request::{Operation, Request};
use udevil_core::sysutil::{ProcessSystemUtility, UtilityPaths};
use udevil_core::classify::SystemResolver;
use udevil_core::utils::program_available_on_path;

const DEFAULT_CONFIG_PATH: &str = "/etc/udevil/udevil-conf";

#[derive(Parser, Debug)]
#[clap(name = "udevil", version, author, about = "Mount or unmount devices, images, and network shares without a password, under administrator policy.")]
struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
struct GlobalOpts {
    /// Enable debug-level logging regardless of `--log-level`.
    #[clap(long, global = true)]
    debug: bool,

    /// Logging level: error, warn, info, debug, trace.
    #[clap(long, global = true)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[clap(long, global = true)]
    log: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[clap(long = "log-format", global = true)]
    log_format: Option<String>,

    /// Path to the policy configuration file.
    #[clap(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Mount a device, disk image, directory-backed loop file, or network share.
    Mount(MountArgs),
    /// Unmount a previously mounted target.
    #[clap(alias = "umount")]
    Unmount(UnmountArgs),
}

#[derive(Parser, Debug)]
struct MountArgs {
    /// Device path, file path, or network URL to mount.
    target: String,
    /// Explicit mount point; derived from policy and the target if omitted.
    #[clap(short = 'p', long = "point")]
    mount_point: Option<PathBuf>,
    /// Filesystem type override.
    #[clap(short = 't', long = "types")]
    fstype: Option<String>,
    /// Comma-separated mount options.
    #[clap(short = 'o', long = "options")]
    options: Option<String>,
    /// Filesystem label, used only for diagnostics.
    #[clap(short = 'L', long = "label")]
    label: Option<String>,
    /// Filesystem UUID, used only for diagnostics.
    #[clap(short = 'U', long = "uuid")]
    uuid: Option<String>,
}

#[derive(Parser, Debug)]
struct UnmountArgs {
    /// Device path, mount point, file path, or network URL to unmount.
    target: Option<String>,
    /// Explicit mount point to unmount, if `target` is omitted.
    #[clap(short = 'p', long = "point")]
    mount_point: Option<PathBuf>,
    /// Force unmount even if busy.
    #[clap(short = 'f', long)]
    force: bool,
    /// Lazily detach the filesystem.
    #[clap(short = 'l', long)]
    lazy: bool,
}

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let opts = Opts::parse();

    if let Err(e) = observability::init(&opts.global) {
        eprintln!("log init failed: {e:?}");
    }

    install_signal_handlers();

    match execute(&opts) {
        Ok(outcome) => {
            match outcome {
                Outcome::Mounted { source, mount_point } => {
                    println!("Mounted {source} at {}", mount_point.display());
                }
                Outcome::Unmounted { source } => {
                    println!("Unmounted {source}");
                }
            }
            0
        }
        Err(err) => {
            eprintln!("udevil: {err}");
            core_exit_code(&err)
        }
    }
}

/// Distinguishes a `CoreError` (mapped via its own `exit_code`) from an
/// `anyhow` wrapper around one (configuration/IO failures during wiring),
/// which are usage errors (exit 1) per spec.md §6.
fn core_exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CoreError>().map(CoreError::exit_code).unwrap_or(1)
}

fn execute(opts: &Opts) -> Result<Outcome> {
    let gate = PrivilegeGate::init().context("initializing privilege gate")?;
    let identity = gate.identity();

    let caller = User::from_uid(identity.real_uid)
        .context("looking up caller's passwd entry")?
        .ok_or_else(|| anyhow::anyhow!("no passwd entry for uid {}", identity.real_uid))?;
    let username = caller.name;

    let policy = PolicySnapshot::from_file(&opts.global.config, identity.real_uid, identity.real_gid, &username)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("loading policy configuration from {}", opts.global.config.display()))?;

    let user_groups: Vec<String> = gate
        .supplementary_groups()
        .iter()
        .filter_map(|gid| privilege::group_name(*gid))
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    let utility_paths = resolve_utility_paths(&policy);
    let sysutil = ProcessSystemUtility::new(utility_paths, gate.sanitized_env().clone());
    let device_info = SysfsDeviceInfo::new();
    let resolver = SystemResolver;
    let mount_table = MountTable::from_self()
        .map_err(anyhow::Error::from)
        .context("reading /proc/self/mountinfo")?;
    let curlftpfs_available = program_available_on_path("curlftpfs");

    let request = build_request(opts)?;
    let original_command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let hooks = HookPrograms {
        validate_rootexec: policy.lookup("validate_rootexec", None),
        validate_exec: policy.lookup("validate_exec", None),
        success_rootexec: policy.lookup("success_rootexec", None),
        success_exec: policy.lookup("success_exec", None),
    };

    let orchestrator = Orchestrator {
        policy: &policy,
        gate: &gate,
        sysutil: &sysutil,
        device_info: &device_info,
        resolver: &resolver,
        mount_table: &mount_table,
        username: &username,
        user_groups: &user_groups,
        curlftpfs_available,
        hooks,
    };

    orchestrator.run(&request, &original_command_line).map_err(anyhow::Error::from)
}

fn resolve_utility_paths(policy: &PolicySnapshot) -> UtilityPaths {
    let defaults = UtilityPaths::default();
    UtilityPaths {
        mount: policy.lookup("mount_prog", None).map(str::to_string).unwrap_or(defaults.mount),
        umount: policy.lookup("umount_prog", None).map(str::to_string).unwrap_or(defaults.umount),
        losetup: policy.lookup("losetup_prog", None).map(str::to_string).unwrap_or(defaults.losetup),
        setfacl: policy.lookup("setfacl_prog", None).map(str::to_string).unwrap_or(defaults.setfacl),
    }
}

fn build_request(opts: &Opts) -> Result<Request> {
    let request = match &opts.subcmd {
        SubCommand::Mount(args) => {
            let mut request = Request::new(Operation::Mount);
            request.target = Some(args.target.clone());
            request.mount_point = args.mount_point.clone();
            request.fstype = args.fstype.clone();
            request.options = args.options.clone();
            request.label = args.label.clone();
            request.uuid = args.uuid.clone();
            request
        }
        SubCommand::Unmount(args) => {
            let mut request = Request::new(Operation::Unmount);
            request.target = args.target.clone();
            request.mount_point = args.mount_point.clone();
            request.force = args.force;
            request.lazy = args.lazy;
            request
        }
    };
    request.validate().map_err(anyhow::Error::from)?;
    Ok(request)
}

extern "C" fn handle_terminating_signal(_signum: libc::c_int) {
    std::process::exit(130);
}

/// Installs handlers for SIGINT/SIGTERM/SIGHUP that exit promptly with the
/// "interrupted" exit code (spec.md §5); SIGSTOP is left at its default
/// disposition rather than handled, which is how a process "ignores" it.
fn install_signal_handlers() {
    let handler = SigHandler::Handler(handle_terminating_signal);
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        let _ = unsafe { signal::signal(signal, handler) };
    }
}
