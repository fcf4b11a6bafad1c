//! Platform-conditional mount backends (spec §4.4).
//!
//! [`MountBackend`] is the seam between the dispatcher and the real
//! kernel/ioctl/subprocess surface, mirroring the upstream C++
//! implementation, which marks the equivalent methods `virtual` expressly
//! so tests can override them with a fake.

pub mod options;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;

use std::os::fd::OwnedFd;
use std::path::Path;

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::nfs_options::NfsMountOptions;
use options::UnmountOptions;

/// Everything the dispatcher needs from a concrete platform mount
/// implementation.
pub trait MountBackend {
    fn fuse_mount(
        &self,
        path: &Path,
        read_only: bool,
        vfs_type: &str,
        cfg: &BrokerConfig,
    ) -> Result<OwnedFd>;

    fn nfs_mount(&self, path: &Path, options: &NfsMountOptions) -> Result<()>;

    /// Both `client_path` and `mount_path` must already be existing
    /// directories.
    fn bind_mount(&self, client_path: &Path, mount_path: &Path) -> Result<()>;

    /// Shared by `UNMOUNT_FUSE` (client-supplied options) and `UNMOUNT_NFS`
    /// (default options, since that request carries none on the wire);
    /// the syscall-level unmount procedure in spec §4.4 does not
    /// distinguish FUSE from NFS.
    fn unmount(&self, path: &Path, options: UnmountOptions) -> Result<()>;

    /// Unmount a bind mount and poll until the kernel confirms it is gone
    /// (spec §4.4), giving up after a grace period without failing the
    /// operation.
    fn bind_unmount(&self, path: &Path) -> Result<()>;

    fn set_log_file(&self, fd: OwnedFd) -> Result<()>;

    fn set_memory_priority(&self, pid: u32, priority: i32) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub fn real_backend() -> impl MountBackend {
    linux::LinuxBackend
}

#[cfg(target_os = "macos")]
pub fn real_backend() -> impl MountBackend {
    macos::MacBackend::new()
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn real_backend() -> impl MountBackend {
    UnsupportedBackend
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub struct UnsupportedBackend;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
impl MountBackend for UnsupportedBackend {
    fn fuse_mount(
        &self,
        _path: &Path,
        _read_only: bool,
        _vfs_type: &str,
        _cfg: &BrokerConfig,
    ) -> Result<OwnedFd> {
        Err(crate::error::BrokerError::validation(
            "FUSE mounts are not supported on this platform",
        ))
    }

    fn nfs_mount(&self, _path: &Path, _options: &NfsMountOptions) -> Result<()> {
        Err(crate::error::BrokerError::validation(
            "NFS mounts are not supported on this platform",
        ))
    }

    fn bind_mount(&self, _client_path: &Path, _mount_path: &Path) -> Result<()> {
        Err(crate::error::BrokerError::validation(
            "bind mounts are not supported on this platform",
        ))
    }

    fn unmount(&self, _path: &Path, _options: UnmountOptions) -> Result<()> {
        Err(crate::error::BrokerError::validation(
            "unmount is not supported on this platform",
        ))
    }

    fn bind_unmount(&self, _path: &Path) -> Result<()> {
        Err(crate::error::BrokerError::validation(
            "unmount is not supported on this platform",
        ))
    }

    fn set_log_file(&self, _fd: OwnedFd) -> Result<()> {
        Err(crate::error::BrokerError::validation(
            "set-log-file is not supported on this platform",
        ))
    }

    fn set_memory_priority(&self, _pid: u32, _priority: i32) -> Result<()> {
        Err(crate::error::BrokerError::validation(
            "set-memory-priority is not supported on this platform",
        ))
    }
}
