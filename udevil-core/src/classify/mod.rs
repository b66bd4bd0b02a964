//! Component C: the target classifier.

pub mod url;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use crate::deviceinfo::{DeviceInfo, DeviceSnapshot};
use crate::error::{CoreError, Result};
use crate::pathutil::canonical::canonicalize_hardened;

pub use url::{infer_scheme, parse_network_url, NetworkFsType, ParsedNetworkUrl, Resolver, SystemResolver};

/// A [`Resolver`] that always fails, for tests that exercise non-network
/// code paths and should never actually perform name resolution.
#[cfg(any(test, feature = "test-util"))]
pub struct NoHostResolverForTests;

#[cfg(any(test, feature = "test-util"))]
impl Resolver for NoHostResolverForTests {
    fn resolve(&self, host: &str) -> Result<Vec<std::net::IpAddr>> {
        Err(CoreError::Classification(format!("cannot resolve {host} in tests")))
    }
}

#[derive(Debug)]
pub enum ClassifiedTarget {
    BlockDevice {
        canonical_path: PathBuf,
        device: DeviceSnapshot,
    },
    /// The descriptor is held until the mount syscall completes, per the
    /// rename-race check in the design.
    RegularFile {
        canonical_path: PathBuf,
        file: File,
        opened_read_only: bool,
    },
    /// Legal only for unmount.
    Directory { canonical_path: PathBuf },
    NetworkShare(ParsedNetworkUrl),
    TmpfsSentinel { name: String },
    /// Legal only for unmount: the device no longer exists but a
    /// mount-table entry may.
    Missing { canonical_path: PathBuf },
}

/// Inspects `spec` and produces a [`ClassifiedTarget`], in the order given
/// by the design: network URL, tmpfs/ramfs sentinel, then path.
pub fn classify(
    spec: &str,
    type_override: Option<&str>,
    allow_missing: bool,
    curlftpfs_available: bool,
    resolver: &dyn Resolver,
    device_info: &dyn DeviceInfo,
) -> Result<ClassifiedTarget> {
    if let Some(fstype) = infer_scheme(spec, type_override, curlftpfs_available) {
        let parsed = parse_network_url(spec, fstype, resolver)?;
        return Ok(ClassifiedTarget::NetworkShare(parsed));
    }

    if (spec == "tmpfs" || spec == "ramfs") && !std::path::Path::new(spec).exists() {
        return Ok(ClassifiedTarget::TmpfsSentinel {
            name: spec.to_string(),
        });
    }

    classify_path(spec, allow_missing, device_info)
}

fn classify_path(spec: &str, allow_missing: bool, device_info: &dyn DeviceInfo) -> Result<ClassifiedTarget> {
    let canonical_path = match canonicalize_hardened(spec) {
        Ok(p) => p,
        Err(CoreError::InvalidPath { .. }) if allow_missing && !std::path::Path::new(spec).exists() => {
            return Ok(ClassifiedTarget::Missing {
                canonical_path: PathBuf::from(spec),
            });
        }
        Err(e) => return Err(e),
    };

    let metadata = match std::fs::symlink_metadata(&canonical_path) {
        Ok(m) => m,
        Err(_) if allow_missing => {
            return Ok(ClassifiedTarget::Missing { canonical_path });
        }
        Err(e) => {
            return Err(CoreError::invalid_path(
                &canonical_path,
                format!("cannot stat: {e}"),
            ))
        }
    };

    let file_type = metadata.file_type();
    if file_type.is_block_device() {
        let device = device_info.snapshot_by_path(&canonical_path)?;
        return Ok(ClassifiedTarget::BlockDevice {
            canonical_path,
            device,
        });
    }
    if file_type.is_dir() {
        if !allow_missing {
            return Err(CoreError::Classification(
                "a directory target is legal only for unmount".to_string(),
            ));
        }
        return Ok(ClassifiedTarget::Directory { canonical_path });
    }
    if file_type.is_file() {
        return open_regular_file(canonical_path);
    }

    Err(CoreError::Classification(format!(
        "{} is neither a block device, directory, nor regular file",
        canonical_path.display()
    )))
}

fn open_regular_file(canonical_path: PathBuf) -> Result<ClassifiedTarget> {
    let (file, opened_read_only) = match OpenOptions::new().read(true).write(true).open(&canonical_path) {
        Ok(f) => (f, false),
        Err(_) => {
            let f = OpenOptions::new()
                .read(true)
                .open(&canonical_path)
                .map_err(|e| CoreError::ResourceError(format!("opening {}: {e}", canonical_path.display())))?;
            (f, true)
        }
    };

    // Re-stat the path and the descriptor and compare (st_dev, st_ino) to
    // detect a rename/swap race between classification and open.
    let path_metadata = std::fs::symlink_metadata(&canonical_path)
        .map_err(|e| CoreError::ResourceError(format!("re-stat {}: {e}", canonical_path.display())))?;
    let fd_metadata = File::metadata(&file)
        .map_err(|e| CoreError::ResourceError(format!("fstat held descriptor: {e}")))?;

    if (path_metadata.dev(), path_metadata.ino()) != (fd_metadata.dev(), fd_metadata.ino()) {
        return Err(CoreError::invalid_path(
            &canonical_path,
            "path was replaced between classification and open",
        ));
    }
    let _ = file.as_raw_fd();

    Ok(ClassifiedTarget::RegularFile {
        canonical_path,
        file,
        opened_read_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deviceinfo::DeviceSnapshot;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct StubDeviceInfo;
    impl DeviceInfo for StubDeviceInfo {
        fn snapshot_by_devnum(&self, _major: u32, _minor: u32) -> Result<DeviceSnapshot> {
            Ok(DeviceSnapshot::default())
        }
        fn snapshot_by_path(&self, _device_path: &std::path::Path) -> Result<DeviceSnapshot> {
            Ok(DeviceSnapshot::default())
        }
    }

    struct NoHostResolver;
    impl Resolver for NoHostResolver {
        fn resolve(&self, host: &str) -> Result<Vec<std::net::IpAddr>> {
            Err(CoreError::Classification(format!("cannot resolve {host} in tests")))
        }
    }

    #[test]
    fn tmpfs_literal_classifies_as_sentinel() {
        let target = classify(
            "tmpfs",
            None,
            false,
            false,
            &NoHostResolver,
            &StubDeviceInfo,
        )
        .unwrap();
        assert!(matches!(target, ClassifiedTarget::TmpfsSentinel { name } if name == "tmpfs"));
    }

    #[test]
    fn regular_file_is_opened_and_classified() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "data").unwrap();
        let target = classify(
            tmp.path().to_str().unwrap(),
            None,
            false,
            false,
            &NoHostResolver,
            &StubDeviceInfo,
        )
        .unwrap();
        assert!(matches!(target, ClassifiedTarget::RegularFile { .. }));
    }

    #[test]
    fn missing_path_is_only_legal_with_allow_missing() {
        let err = classify(
            "/definitely/does/not/exist/anywhere",
            None,
            false,
            false,
            &NoHostResolver,
            &StubDeviceInfo,
        );
        assert!(err.is_err());

        let target = classify(
            "/definitely/does/not/exist/anywhere",
            None,
            true,
            false,
            &NoHostResolver,
            &StubDeviceInfo,
        )
        .unwrap();
        assert!(matches!(target, ClassifiedTarget::Missing { .. }));
    }
}
