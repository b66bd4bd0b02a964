//! Real implementation: invokes the mount/umount/losetup/setfacl
//! utilities as subprocesses, with real and effective UID set to 0
//! (callers are expected to invoke these methods from inside an
//! [`ElevatedGuard`](crate::privilege::ElevatedGuard) region).

use std::path::Path;
use std::process::{Command, Output};

use crate::error::{CoreError, Result};
use crate::privilege::SanitizedEnv;

use super::{MountInvocation, SystemUtility, UnmountInvocation, UtilityPaths};

pub struct ProcessSystemUtility {
    paths: UtilityPaths,
    env: SanitizedEnv,
}

impl ProcessSystemUtility {
    pub fn new(paths: UtilityPaths, env: SanitizedEnv) -> Self {
        ProcessSystemUtility { paths, env }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        Command::new(program)
            .args(args)
            .env_clear()
            .envs(self.env.iter())
            .output()
            .map_err(|e| CoreError::ExternalFailure {
                utility: program.to_string(),
                exit_code: None,
                stderr: e.to_string(),
            })
    }

    fn run_checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.run(program, args)?;
        if !output.status.success() {
            return Err(CoreError::ExternalFailure {
                utility: program.to_string(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SystemUtility for ProcessSystemUtility {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn mount(&self, invocation: &MountInvocation) -> Result<()> {
        let mut args: Vec<String> = Vec::new();
        if invocation.verbose {
            args.push("-v".to_string());
        }
        if let Some(fstype) = &invocation.fstype {
            args.push("-t".to_string());
            args.push(fstype.clone());
        }
        if let Some(options) = &invocation.options {
            args.push("-o".to_string());
            args.push(options.clone());
        }
        args.push(invocation.source.clone());
        if let Some(target) = &invocation.target {
            args.push(target.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&self.paths.mount, &arg_refs).map(|_| ())
    }

    fn mount_probe(&self, source: &str) -> Result<bool> {
        let output = self.run(&self.paths.mount, &["-f", "-v", source])?;
        Ok(output.status.success())
    }

    fn umount(&self, invocation: &UnmountInvocation) -> Result<()> {
        let mut args: Vec<String> = vec!["-v".to_string()];
        if invocation.force {
            args.push("-f".to_string());
        }
        if invocation.lazy {
            args.push("-l".to_string());
        }
        if invocation.detach_loop {
            args.push("-d".to_string());
        }
        args.push(invocation.source_or_target.clone());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&self.paths.umount, &arg_refs).map(|_| ())
    }

    fn losetup_find_free(&self) -> Result<String> {
        Ok(self.run_checked(&self.paths.losetup, &["-f"])?.trim().to_string())
    }

    fn losetup_attach(&self, loop_device: &str, backing_fd_path: &Path) -> Result<()> {
        let path_str = backing_fd_path.to_string_lossy();
        self.run_checked(&self.paths.losetup, &[loop_device, &path_str])
            .map(|_| ())
    }

    fn losetup_detach(&self, loop_device: &str) -> Result<()> {
        self.run_checked(&self.paths.losetup, &["-d", loop_device]).map(|_| ())
    }

    fn losetup_query(&self, backing_file: &Path) -> Result<Option<String>> {
        let path_str = backing_file.to_string_lossy();
        let output = self.run(&self.paths.losetup, &["-j", &path_str])?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split(':').next().map(str::to_string).filter(|s| !s.is_empty()))
    }

    fn losetup_list(&self) -> Result<Vec<(String, String)>> {
        let stdout = self.run_checked(&self.paths.losetup, &["-a"])?;
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (dev, rest) = line.split_once(':')?;
                let backing = rest.rsplit('(').next()?.trim_end_matches(')');
                Some((dev.trim().to_string(), backing.trim().to_string()))
            })
            .collect())
    }

    fn setfacl(&self, dir: &Path, username: &str) -> Result<()> {
        let spec = format!("u:{username}:rx");
        let dir_str = dir.to_string_lossy();
        self.run_checked(&self.paths.setfacl, &["-m", &spec, &dir_str])
            .map(|_| ())
    }
}
