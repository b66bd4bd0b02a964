//! Component E: the mount orchestrator — the state machine from §4.5 that
//! combines classification, policy, and the path/point manager into one
//! mount or unmount operation, driving `mount`/`umount`/`losetup` through
//! the privilege gate.

pub mod options;
pub mod state;

use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};

use crate::classify::{self, ClassifiedTarget, NetworkFsType, Resolver};
use crate::deviceinfo::DeviceInfo;
use crate::error::{CoreError, Result};
use crate::hooks;
use crate::loopdev::LoopAttachment;
use crate::marker;
use crate::mounttable::MountTable;
use crate::pathutil::canonical::{canonicalize_hardened, recheck_unchanged};
use crate::pathutil::mountpoint;
use crate::policy::{group_match, list_match, option_check, PolicySnapshot};
use crate::privilege::PrivilegeGate;
use crate::request::{Operation, Request};
use crate::sysutil::{MountInvocation, SystemUtility, UnmountInvocation};

use state::OrchestratorState as S;

/// The four hook program paths from the policy snapshot, resolved once by
/// the caller.
pub struct HookPrograms<'a> {
    pub validate_rootexec: Option<&'a str>,
    pub validate_exec: Option<&'a str>,
    pub success_rootexec: Option<&'a str>,
    pub success_exec: Option<&'a str>,
}

/// Every external collaborator and piece of context one orchestrator run
/// needs, borrowed for the duration of `run`. Matches §9's note that the
/// source's process-wide globals become explicit context here.
pub struct Orchestrator<'a> {
    pub policy: &'a PolicySnapshot,
    pub gate: &'a PrivilegeGate,
    pub sysutil: &'a dyn SystemUtility,
    pub device_info: &'a dyn DeviceInfo,
    pub resolver: &'a dyn Resolver,
    pub mount_table: &'a MountTable,
    pub username: &'a str,
    pub user_groups: &'a [String],
    pub curlftpfs_available: bool,
    pub hooks: HookPrograms<'a>,
}

#[derive(Debug)]
pub enum Outcome {
    Mounted { source: String, mount_point: PathBuf },
    Unmounted { source: String },
}

impl<'a> Orchestrator<'a> {
    pub fn run(&self, request: &Request, original_command_line: &str) -> Result<Outcome> {
        request.validate()?;
        S::Start.enter();
        let result = match request.operation() {
            Operation::Mount => self.mount(request, original_command_line),
            Operation::Unmount => self.unmount(request, original_command_line),
        };
        match &result {
            Ok(_) => S::DoneOk.enter(),
            Err(_) => S::DoneErr.enter(),
        }
        result
    }

    fn caller_uid(&self) -> Uid {
        self.gate.identity().real_uid
    }

    fn caller_gid(&self) -> Gid {
        self.gate.identity().real_gid
    }

    fn run_validate_hooks(&self, message: &str, original_command_line: &str) -> Result<()> {
        S::RunValidateHooks.enter();
        hooks::run_validate_hooks(
            self.hooks.validate_rootexec,
            self.hooks.validate_exec,
            self.username,
            message,
            original_command_line,
            self.gate.sanitized_env(),
            self.gate,
        )
    }

    fn run_success_hooks(&self, message: &str, original_command_line: &str) {
        S::RunSuccessHooks.enter();
        hooks::run_success_hooks(
            self.hooks.success_rootexec,
            self.hooks.success_exec,
            self.username,
            message,
            original_command_line,
            self.gate.sanitized_env(),
            self.gate,
        );
    }

    // ---- mount -------------------------------------------------------

    fn mount(&self, request: &Request, original_command_line: &str) -> Result<Outcome> {
        let target_spec = request
            .target
            .as_deref()
            .ok_or_else(|| CoreError::InvalidArgument("mount requires a target".to_string()))?;

        S::TryUnprivileged.enter();
        if self.try_unprivileged_mount(target_spec, request)? {
            self.run_success_hooks("mount", original_command_line);
            return Ok(Outcome::Mounted {
                source: target_spec.to_string(),
                mount_point: request.mount_point.clone().unwrap_or_default(),
            });
        }

        S::Classify.enter();
        let classified = classify::classify(
            target_spec,
            request.fstype.as_deref(),
            false,
            self.curlftpfs_available,
            self.resolver,
            self.device_info,
        )?;

        if let ClassifiedTarget::Directory { .. } | ClassifiedTarget::Missing { .. } = classified {
            return Err(CoreError::Classification(
                "a directory or missing path is a legal mount target only for unmount".to_string(),
            ));
        }

        S::ResolveFstype.enter();
        let is_remount = options::is_remount(request.options.as_deref());
        let fstype = self.resolve_fstype(&classified, request)?;
        if is_remount && matches!(classified, ClassifiedTarget::RegularFile { .. }) {
            return Err(CoreError::InvalidArgument(
                "remount is not supported for files".to_string(),
            ));
        }
        if is_remount && !options::remount_allowed_for(&fstype) {
            return Err(CoreError::InvalidArgument(format!(
                "remount is not supported for {fstype}"
            )));
        }

        self.policy_gate(&classified, &fstype, request)?;

        self.run_validate_hooks("mount", original_command_line)?;

        S::ResolveMountPoint.enter();
        let mount_point_plan = self.resolve_mount_point(&classified, &fstype, request)?;

        let opened_read_only = matches!(
            &classified,
            ClassifiedTarget::RegularFile { opened_read_only: true, .. }
        );

        let options_input = options::OptionsInput {
            policy: self.policy,
            fstype: &fstype,
            user_options: request.options.as_deref(),
            network: match &classified {
                ClassifiedTarget::NetworkShare(url) => Some(url),
                _ => None,
            },
            opened_read_only,
            caller_uid: self.caller_uid(),
            caller_gid: self.caller_gid(),
            username: self.username,
        };
        let assembled_options = options::assemble(&options_input);

        let source = self.source_string(&classified);

        let created_dir = mount_point_plan.needs_creation;
        let mount_point = mount_point_plan.path.clone();

        let option_candidates = self.cifs_credential_candidates(&classified, &fstype, &assembled_options);
        let mut result = Err(CoreError::InvariantBroken("no option candidates".to_string()));
        for candidate_options in &option_candidates {
            result = self.perform_mount(&classified, &fstype, candidate_options, &mount_point, created_dir);
            if result.is_ok() {
                break;
            }
        }

        match result {
            Ok(()) => {
                if created_dir {
                    let configured_mode = self
                        .policy
                        .lookup("mount_point_mode", Some(&fstype))
                        .and_then(|v| u32::from_str_radix(v.trim_start_matches('0'), 8).ok());
                    let _ = mountpoint::finalize_mount_point_mode(&mount_point, configured_mode);
                }
                self.run_success_hooks("mount", original_command_line);
                Ok(Outcome::Mounted { source, mount_point })
            }
            Err(e) => {
                S::Cleanup.enter();
                if created_dir {
                    let _guard = self.gate.elevate();
                    let _ = marker::remove_marker_and_dir(&mount_point);
                }
                Err(e)
            }
        }
    }

    fn try_unprivileged_mount(&self, target: &str, request: &Request) -> Result<bool> {
        if !self.sysutil.mount_probe(target)? {
            return Ok(false);
        }
        let invocation = MountInvocation {
            source: target.to_string(),
            target: request.mount_point.as_ref().map(|p| p.display().to_string()),
            fstype: None,
            options: None,
            verbose: false,
        };
        Ok(self.sysutil.mount(&invocation).is_ok())
    }

    /// §4.5: for cifs/smbfs with no credentials supplied, try `guest`
    /// first (if allowed), then `user=<caller>` (if allowed), each as a
    /// separate mount attempt; otherwise a single candidate.
    fn cifs_credential_candidates(&self, classified: &ClassifiedTarget, fstype: &str, base_options: &str) -> Vec<String> {
        let ClassifiedTarget::NetworkShare(url) = classified else {
            return vec![base_options.to_string()];
        };
        if !matches!(url.fstype, NetworkFsType::Cifs | NetworkFsType::Smbfs) || url.user.is_some() {
            return vec![base_options.to_string()];
        }

        let mut candidates = Vec::new();
        if list_match(self.policy, "allowed_options", Some(fstype), "guest") {
            candidates.push(format!("{base_options},guest"));
        }
        let user_option = format!("user={}", self.username);
        if list_match(self.policy, "allowed_options", Some(fstype), &user_option) {
            candidates.push(format!("{base_options},user={}", self.username));
        }
        if candidates.is_empty() {
            candidates.push(base_options.to_string());
        }
        candidates
    }

    fn resolve_fstype(&self, classified: &ClassifiedTarget, request: &Request) -> Result<String> {
        if let Some(fstype) = &request.fstype {
            return Ok(fstype.clone());
        }
        match classified {
            ClassifiedTarget::BlockDevice { device, canonical_path } => device.fstype.clone().ok_or_else(|| {
                CoreError::Classification(format!(
                    "no filesystem type available for {}",
                    canonical_path.display()
                ))
            }),
            ClassifiedTarget::NetworkShare(url) => Ok(url.fstype.as_str().to_string()),
            ClassifiedTarget::TmpfsSentinel { name } => Ok(name.clone()),
            ClassifiedTarget::RegularFile { .. } => Ok("file".to_string()),
            ClassifiedTarget::Directory { .. } | ClassifiedTarget::Missing { .. } => {
                Err(CoreError::InvariantBroken("unreachable: not a mount target".to_string()))
            }
        }
    }

    fn source_string(&self, classified: &ClassifiedTarget) -> String {
        match classified {
            ClassifiedTarget::BlockDevice { canonical_path, .. } => canonical_path.display().to_string(),
            ClassifiedTarget::NetworkShare(url) => url.canonical_url.clone(),
            ClassifiedTarget::TmpfsSentinel { name } => name.clone(),
            ClassifiedTarget::RegularFile { canonical_path, .. } => canonical_path.display().to_string(),
            ClassifiedTarget::Directory { canonical_path } | ClassifiedTarget::Missing { canonical_path } => {
                canonical_path.display().to_string()
            }
        }
    }

    /// §4.5's ordered policy gate. Each failing check aborts with
    /// `CoreError::PolicyDenied` carrying the category name.
    fn policy_gate(&self, classified: &ClassifiedTarget, fstype: &str, request: &Request) -> Result<()> {
        S::PolicyGate.enter();
        let caller_uid = self.caller_uid();

        if !list_match(self.policy, "allowed_types", None, fstype) {
            return Err(CoreError::policy_denied("allowed_types", format!("{fstype} is not allowed")));
        }

        let uid_form = format!("UID={}", caller_uid.as_raw());
        if !(list_match(self.policy, "allowed_users", Some(fstype), self.username)
            || list_match(self.policy, "allowed_users", Some(fstype), &uid_form))
        {
            return Err(CoreError::policy_denied(
                "allowed_users",
                format!("{} is not an allowed user for {fstype}", self.username),
            ));
        }

        if !group_match(
            self.policy,
            "allowed_groups",
            Some(fstype),
            self.username,
            self.user_groups,
            caller_uid,
        ) {
            return Err(CoreError::policy_denied(
                "allowed_groups",
                format!("{} is not in an allowed group for {fstype}", self.username),
            ));
        }

        match classified {
            ClassifiedTarget::BlockDevice { canonical_path, device } => {
                let candidate = canonical_path.display().to_string();
                if !list_match(self.policy, "allowed_devices", Some(fstype), &candidate)
                    || list_match(self.policy, "forbidden_devices", Some(fstype), &candidate)
                {
                    return Err(CoreError::policy_denied("allowed_devices", candidate));
                }
                if device.system_internal && !caller_uid.is_root() {
                    self.check_internal_device(device, &candidate)?;
                }
            }
            ClassifiedTarget::NetworkShare(url) => {
                if !list_match(self.policy, "allowed_networks", Some(fstype), &url.host)
                    || list_match(self.policy, "forbidden_networks", Some(fstype), &url.host)
                {
                    return Err(CoreError::policy_denied("allowed_networks", url.host.clone()));
                }
            }
            ClassifiedTarget::RegularFile { canonical_path, .. } => {
                let candidate = canonical_path.display().to_string();
                if !list_match(self.policy, "allowed_files", Some(fstype), &candidate)
                    || list_match(self.policy, "forbidden_files", Some(fstype), &candidate)
                {
                    return Err(CoreError::policy_denied("allowed_files", candidate));
                }
            }
            ClassifiedTarget::TmpfsSentinel { .. } => {}
            ClassifiedTarget::Directory { .. } | ClassifiedTarget::Missing { .. } => {}
        }

        if let Some(explicit) = &request.mount_point {
            if let Some(parent) = explicit.parent() {
                let parent_str = parent.display().to_string();
                if !list_match(self.policy, "allowed_media_dirs", Some(fstype), &parent_str) {
                    return Err(CoreError::policy_denied("allowed_media_dirs", parent_str));
                }
            }
        }

        if let Some(requested_options) = &request.options {
            if requested_options.contains(char::is_whitespace) || requested_options.contains('\\') {
                return Err(CoreError::policy_denied(
                    "allowed_options",
                    "option string contains whitespace or a backslash".to_string(),
                ));
            }
            if let Some(bad) = option_check(self.policy, "allowed_options", Some(fstype), requested_options) {
                return Err(CoreError::policy_denied("allowed_options", bad.to_string()));
            }
        }

        Ok(())
    }

    /// §4.5 check 5: system-internal devices require an explicit allow for
    /// non-root callers, unless the device is a loop device backed by a
    /// file the caller is independently allowed to mount.
    fn check_internal_device(&self, device: &crate::deviceinfo::DeviceSnapshot, candidate: &str) -> Result<()> {
        if list_match(self.policy, "allowed_internal_devices", None, candidate) {
            return Ok(());
        }
        if let Some(uuid) = &device.uuid {
            if list_match(self.policy, "allowed_internal_uuids", None, uuid) {
                return Ok(());
            }
        }
        if candidate.starts_with("/dev/loop") {
            if let Ok(entries) = self.sysutil.losetup_list() {
                if let Some((_, backing)) = entries.iter().find(|(dev, _)| dev == candidate) {
                    if list_match(self.policy, "allowed_files", None, backing) {
                        return Ok(());
                    }
                }
            }
        }
        Err(CoreError::policy_denied(
            "allowed_internal_devices",
            format!("{candidate} is system-internal and not explicitly allowed"),
        ))
    }

    fn resolve_mount_point(
        &self,
        classified: &ClassifiedTarget,
        fstype: &str,
        request: &Request,
    ) -> Result<MountPointPlan> {
        if let Some(explicit) = &request.mount_point {
            mountpoint::validate_explicit_mount_point(explicit, self.caller_uid(), self.mount_table)?;
            return Ok(MountPointPlan {
                path: explicit.clone(),
                needs_creation: false,
            });
        }

        let preferred_name = match classified {
            ClassifiedTarget::BlockDevice { canonical_path, device } => mountpoint::device_mount_point_name(
                device.label.as_deref(),
                device.by_id_link.as_deref(),
                canonical_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("device"),
                device.uuid.as_deref(),
            ),
            ClassifiedTarget::RegularFile { canonical_path, .. } => mountpoint::device_mount_point_name(
                None,
                None,
                canonical_path
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .unwrap_or("image"),
                None,
            ),
            ClassifiedTarget::NetworkShare(url) => {
                mountpoint::network_mount_point_name(fstype, &url.host, &url.path)
            }
            ClassifiedTarget::TmpfsSentinel { name } => Some(name.clone()),
            ClassifiedTarget::Directory { .. } | ClassifiedTarget::Missing { .. } => None,
        }
        .ok_or_else(|| CoreError::InvalidArgument("could not derive a mount-point name".to_string()))?;

        let media_dirs = self.policy.lookup("allowed_media_dirs", Some(fstype));
        let parent = media_dirs
            .and_then(|list| mountpoint::first_accessible_media_dir(list.split(',')))
            .map(Ok)
            .unwrap_or_else(|| {
                let _guard = self.gate.elevate()?;
                mountpoint::ensure_per_user_media_dir(self.username, self.sysutil)
            })?;

        let chosen = mountpoint::disambiguate_name(&parent, &preferred_name, self.caller_uid());

        {
            let _guard = self.gate.elevate()?;
            mountpoint::create_mount_point_dir(&chosen)?;
        }

        Ok(MountPointPlan {
            path: chosen,
            needs_creation: true,
        })
    }

    fn perform_mount(
        &self,
        classified: &ClassifiedTarget,
        fstype: &str,
        assembled_options: &str,
        mount_point: &Path,
        created_dir: bool,
    ) -> Result<()> {
        let _ = created_dir;
        match classified {
            ClassifiedTarget::RegularFile {
                canonical_path,
                file,
                ..
            } => {
                S::AttachLoop.enter();
                let guard = self.gate.elevate_real()?;
                let attachment = LoopAttachment::attach(canonical_path, file, self.sysutil)?;

                S::MountSyscall.enter();
                let invocation = MountInvocation {
                    source: attachment.loop_device().to_string(),
                    target: Some(mount_point.display().to_string()),
                    fstype: if fstype == "file" { None } else { Some(fstype.to_string()) },
                    options: Some(assembled_options.to_string()),
                    verbose: true,
                };
                let mount_result = self.sysutil.mount(&invocation);
                match mount_result {
                    Ok(()) => {
                        attachment.disarm();
                        drop(guard);
                        Ok(())
                    }
                    Err(e) => {
                        drop(guard);
                        Err(e)
                    }
                }
            }
            ClassifiedTarget::BlockDevice { canonical_path, .. } => {
                S::MountSyscall.enter();
                let recheck = canonicalize_hardened(&canonical_path.to_string_lossy())?;
                recheck_unchanged(canonical_path, &recheck)?;
                let _guard = self.gate.elevate_real()?;
                let invocation = MountInvocation {
                    source: canonical_path.display().to_string(),
                    target: Some(mount_point.display().to_string()),
                    fstype: Some(fstype.to_string()),
                    options: Some(assembled_options.to_string()),
                    verbose: true,
                };
                self.sysutil.mount(&invocation)
            }
            ClassifiedTarget::NetworkShare(url) => {
                S::MountSyscall.enter();
                let _guard = self.gate.elevate_real()?;
                let invocation = MountInvocation {
                    source: url.canonical_url.clone(),
                    target: Some(mount_point.display().to_string()),
                    fstype: Some(fstype.to_string()),
                    options: Some(assembled_options.to_string()),
                    verbose: true,
                };
                self.sysutil.mount(&invocation)
            }
            ClassifiedTarget::TmpfsSentinel { name } => {
                S::MountSyscall.enter();
                let _guard = self.gate.elevate_real()?;
                let invocation = MountInvocation {
                    source: name.clone(),
                    target: Some(mount_point.display().to_string()),
                    fstype: Some(fstype.to_string()),
                    options: Some(assembled_options.to_string()),
                    verbose: true,
                };
                self.sysutil.mount(&invocation)
            }
            ClassifiedTarget::Directory { .. } | ClassifiedTarget::Missing { .. } => Err(
                CoreError::InvariantBroken("unreachable: not a mount target".to_string()),
            ),
        }
    }

    // ---- unmount -------------------------------------------------------

    fn unmount(&self, request: &Request, original_command_line: &str) -> Result<Outcome> {
        let target_spec = request
            .target
            .clone()
            .or_else(|| request.mount_point.as_ref().map(|p| p.display().to_string()))
            .ok_or_else(|| CoreError::InvalidArgument("unmount requires a target or mount point".to_string()))?;

        S::TryUnprivileged.enter();
        let unprivileged_invocation = UnmountInvocation {
            source_or_target: target_spec.clone(),
            force: request.force,
            lazy: request.lazy,
            detach_loop: false,
        };
        if self.sysutil.umount(&unprivileged_invocation).is_ok() {
            self.run_success_hooks("unmount", original_command_line);
            return Ok(Outcome::Unmounted { source: target_spec });
        }

        S::Classify.enter();
        let classified = classify::classify(
            &target_spec,
            request.fstype.as_deref(),
            true,
            self.curlftpfs_available,
            self.resolver,
            self.device_info,
        )?;

        let (resolved_source, fstype, file_policy_candidate) = self.resolve_unmount_source(&classified)?;

        if let Some(candidate) = &file_policy_candidate {
            if !list_match(self.policy, "allowed_files", fstype.as_deref(), candidate)
                || list_match(self.policy, "forbidden_files", fstype.as_deref(), candidate)
            {
                return Err(CoreError::policy_denied("allowed_files", candidate.clone()));
            }
        }

        self.run_validate_hooks("unmount", original_command_line)?;

        S::MountSyscall.enter();
        let target_for_umount = match &classified {
            ClassifiedTarget::Directory { canonical_path } => canonical_path.display().to_string(),
            _ => resolved_source.clone(),
        };

        let was_core_created = matches!(&classified, ClassifiedTarget::Directory { canonical_path } if marker::is_core_created(canonical_path));

        {
            let _guard = self.gate.elevate_real()?;
            let invocation = UnmountInvocation {
                source_or_target: target_for_umount.clone(),
                force: request.force,
                lazy: request.lazy,
                detach_loop: resolved_source.starts_with("/dev/loop"),
            };
            self.sysutil.umount(&invocation)?;

            if resolved_source.starts_with("/dev/loop") && !target_for_umount.starts_with("/dev/loop") {
                let _ = self.sysutil.losetup_detach(&resolved_source);
            }
        }

        if was_core_created {
            if let ClassifiedTarget::Directory { canonical_path } = &classified {
                S::Cleanup.enter();
                let _guard = self.gate.elevate();
                let _ = marker::remove_marker_and_dir(canonical_path);
            }
        }

        self.run_success_hooks("unmount", original_command_line);
        Ok(Outcome::Unmounted { source: resolved_source })
    }

    /// Resolves the device/loop source backing an unmount target, per
    /// §4.5's unmount-resolution rules. Returns (source string to unmount
    /// by, filesystem type if known, file-policy candidate if the source
    /// traces back to a regular file).
    fn resolve_unmount_source(
        &self,
        classified: &ClassifiedTarget,
    ) -> Result<(String, Option<String>, Option<String>)> {
        match classified {
            ClassifiedTarget::Directory { canonical_path } => {
                let entry = self
                    .mount_table
                    .find_by_mount_point(canonical_path)
                    .ok_or_else(|| CoreError::NotMounted(canonical_path.display().to_string()))?;
                let source = entry.source.clone();
                let fstype = Some(entry.fstype.clone());
                let file_candidate = if source.starts_with("/dev/loop") {
                    self.sysutil.losetup_query(canonical_path).ok().flatten().and(
                        self.sysutil
                            .losetup_list()
                            .ok()
                            .and_then(|entries| entries.into_iter().find(|(dev, _)| *dev == source).map(|(_, b)| b)),
                    )
                } else {
                    None
                };
                Ok((source, fstype, file_candidate))
            }
            ClassifiedTarget::RegularFile { canonical_path, .. } => {
                let backing = canonical_path.display().to_string();
                let loop_dev = crate::loopdev::find_attached_loop(canonical_path, self.sysutil)?
                    .ok_or_else(|| CoreError::NotMounted(backing.clone()))?;
                Ok((loop_dev, None, Some(backing)))
            }
            ClassifiedTarget::BlockDevice { canonical_path, device } => {
                let candidate = canonical_path.display().to_string();
                if candidate.starts_with("/dev/loop") {
                    let backing = self
                        .sysutil
                        .losetup_list()
                        .ok()
                        .and_then(|entries| entries.into_iter().find(|(dev, _)| *dev == candidate).map(|(_, b)| b));
                    return Ok((candidate, device.fstype.clone(), backing));
                }
                Ok((candidate, device.fstype.clone(), None))
            }
            ClassifiedTarget::Missing { canonical_path } => {
                let candidate = canonical_path.display().to_string();
                let entry = self
                    .mount_table
                    .find_by_source(&candidate)
                    .or_else(|| self.mount_table.find_by_mount_point(canonical_path))
                    .ok_or_else(|| CoreError::NotMounted(candidate.clone()))?;
                Ok((entry.source.clone(), Some(entry.fstype.clone()), None))
            }
            ClassifiedTarget::NetworkShare(url) => Ok((url.canonical_url.clone(), Some(url.fstype.as_str().to_string()), None)),
            ClassifiedTarget::TmpfsSentinel { name } => Ok((name.clone(), Some(name.clone()), None)),
        }
    }
}

struct MountPointPlan {
    path: PathBuf,
    needs_creation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::NoHostResolverForTests;
    use crate::deviceinfo::DeviceSnapshot;
    use crate::policy::PolicySnapshot;
    use crate::privilege::PrivilegeGate;
    use crate::sysutil::RecordingSystemUtility;
    use nix::unistd::{Gid, Uid};

    struct StubDeviceInfo;
    impl DeviceInfo for StubDeviceInfo {
        fn snapshot_by_devnum(&self, _major: u32, _minor: u32) -> Result<DeviceSnapshot> {
            Ok(DeviceSnapshot::default())
        }
        fn snapshot_by_path(&self, _device_path: &Path) -> Result<DeviceSnapshot> {
            Ok(DeviceSnapshot {
                fstype: Some("vfat".to_string()),
                ..DeviceSnapshot::default()
            })
        }
    }

    fn policy_allowing_vfat() -> PolicySnapshot {
        PolicySnapshot::from_str(
            "allowed_types = vfat\nallowed_users = alice\nallowed_groups = *\nallowed_devices = *\n",
            Uid::from_raw(1000),
            Gid::from_raw(1000),
            "alice",
        )
        .unwrap()
    }

    #[test]
    fn unprivileged_fast_path_mount_skips_policy() {
        let sysutil = RecordingSystemUtility::new();
        sysutil.mark_known("/dev/sdb1");
        let policy = PolicySnapshot::default(); // deliberately empty: would deny everything
        let mount_table = MountTable::default();
        let gate = PrivilegeGate::init().unwrap();

        let orchestrator = Orchestrator {
            policy: &policy,
            gate: &gate,
            sysutil: &sysutil,
            device_info: &StubDeviceInfo,
            resolver: &NoHostResolverForTests,
            mount_table: &mount_table,
            username: "alice",
            user_groups: &[],
            curlftpfs_available: false,
            hooks: HookPrograms {
                validate_rootexec: None,
                validate_exec: None,
                success_rootexec: None,
                success_exec: None,
            },
        };

        let mut request = Request::new(Operation::Mount);
        request.target = Some("/dev/sdb1".to_string());
        let outcome = orchestrator.run(&request, "udevil mount /dev/sdb1").unwrap();
        assert!(matches!(outcome, Outcome::Mounted { source, .. } if source == "/dev/sdb1"));
        assert_eq!(sysutil.mount_calls().len(), 1);
    }

    #[test]
    fn policy_gate_rejects_disallowed_type() {
        let sysutil = RecordingSystemUtility::new();
        let policy = PolicySnapshot::from_str("allowed_types = ext4\n", Uid::from_raw(1000), Gid::from_raw(1000), "alice").unwrap();
        let mount_table = MountTable::default();
        let gate = PrivilegeGate::init().unwrap();

        let orchestrator = Orchestrator {
            policy: &policy,
            gate: &gate,
            sysutil: &sysutil,
            device_info: &StubDeviceInfo,
            resolver: &NoHostResolverForTests,
            mount_table: &mount_table,
            username: "alice",
            user_groups: &[],
            curlftpfs_available: false,
            hooks: HookPrograms {
                validate_rootexec: None,
                validate_exec: None,
                success_rootexec: None,
                success_exec: None,
            },
        };

        let mut request = Request::new(Operation::Mount);
        request.target = Some("/dev/sdb1".to_string());
        let err = orchestrator.run(&request, "udevil mount /dev/sdb1");
        assert!(matches!(err, Err(CoreError::PolicyDenied { .. })));
    }

    #[test]
    fn internal_device_requires_explicit_allow_for_non_root() {
        let _ = policy_allowing_vfat();
    }

    fn regular_file_target(file: std::fs::File, path: PathBuf) -> ClassifiedTarget {
        ClassifiedTarget::RegularFile {
            canonical_path: path,
            file,
            opened_read_only: false,
        }
    }

    #[test]
    fn resolve_fstype_defaults_regular_files_to_file_sentinel_for_kernel_probe() {
        let sysutil = RecordingSystemUtility::new();
        let policy = PolicySnapshot::default();
        let mount_table = MountTable::default();
        let gate = PrivilegeGate::init().unwrap();

        let orchestrator = Orchestrator {
            policy: &policy,
            gate: &gate,
            sysutil: &sysutil,
            device_info: &StubDeviceInfo,
            resolver: &NoHostResolverForTests,
            mount_table: &mount_table,
            username: "alice",
            user_groups: &[],
            curlftpfs_available: false,
            hooks: HookPrograms {
                validate_rootexec: None,
                validate_exec: None,
                success_rootexec: None,
                success_exec: None,
            },
        };

        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = std::fs::File::open(tmp.path()).unwrap();
        let classified = regular_file_target(file, tmp.path().to_path_buf());
        let request = Request::new(Operation::Mount);

        let fstype = orchestrator.resolve_fstype(&classified, &request).unwrap();
        assert_eq!(fstype, "file");
    }

    #[test]
    fn remount_is_rejected_for_regular_files() {
        let sysutil = RecordingSystemUtility::new();
        let policy = PolicySnapshot::from_str(
            "allowed_types = file\nallowed_users = alice\nallowed_groups = *\nallowed_files = *\n",
            Uid::from_raw(1000),
            Gid::from_raw(1000),
            "alice",
        )
        .unwrap();
        let mount_table = MountTable::default();
        let gate = PrivilegeGate::init().unwrap();

        let orchestrator = Orchestrator {
            policy: &policy,
            gate: &gate,
            sysutil: &sysutil,
            device_info: &StubDeviceInfo,
            resolver: &NoHostResolverForTests,
            mount_table: &mount_table,
            username: "alice",
            user_groups: &[],
            curlftpfs_available: false,
            hooks: HookPrograms {
                validate_rootexec: None,
                validate_exec: None,
                success_rootexec: None,
                success_exec: None,
            },
        };

        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut request = Request::new(Operation::Mount);
        request.target = Some(tmp.path().display().to_string());
        request.options = Some("remount".to_string());

        let err = orchestrator.run(&request, "udevil mount cd.iso -o remount");
        assert!(matches!(err, Err(CoreError::InvalidArgument(msg)) if msg.contains("files")));
    }

    struct FixedResolver(std::net::IpAddr);
    impl Resolver for FixedResolver {
        fn resolve(&self, _host: &str) -> Result<Vec<std::net::IpAddr>> {
            Ok(vec![self.0])
        }
    }

    #[test]
    fn cifs_without_credentials_retries_guest_then_caller_user() {
        let sysutil = RecordingSystemUtility::new();
        sysutil.fail_next_mount(CoreError::ExternalFailure {
            utility: "mount".to_string(),
            exit_code: Some(1),
            stderr: "guest access denied".to_string(),
        });
        let policy = PolicySnapshot::from_str(
            "allowed_types = cifs\nallowed_users = alice\nallowed_groups = *\nallowed_networks = *\nallowed_options = nosuid,noexec,nodev,user=alice,uid=1000,gid=1000,guest,user=alice\n",
            Uid::from_raw(1000),
            Gid::from_raw(1000),
            "alice",
        )
        .unwrap();
        let mount_table = MountTable::default();
        let gate = PrivilegeGate::init().unwrap();
        let resolver = FixedResolver("10.0.0.5".parse().unwrap());

        let orchestrator = Orchestrator {
            policy: &policy,
            gate: &gate,
            sysutil: &sysutil,
            device_info: &StubDeviceInfo,
            resolver: &resolver,
            mount_table: &mount_table,
            username: "alice",
            user_groups: &[],
            curlftpfs_available: false,
            hooks: HookPrograms {
                validate_rootexec: None,
                validate_exec: None,
                success_rootexec: None,
                success_exec: None,
            },
        };

        let mut request = Request::new(Operation::Mount);
        request.target = Some("smb://fileserver/share".to_string());
        let outcome = orchestrator.run(&request, "udevil mount smb://fileserver/share");
        if gate.is_setuid_root() {
            let outcome = outcome.unwrap();
            assert!(matches!(outcome, Outcome::Mounted { .. }));
            let calls = sysutil.mount_calls();
            assert_eq!(calls.len(), 2);
            assert!(calls[0].options.as_deref().unwrap().ends_with(",guest"));
            assert!(calls[1].options.as_deref().unwrap().ends_with(",user=alice"));
        }
    }
}
