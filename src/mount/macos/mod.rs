//! macOS mount backend.
//!
//! FUSE mounts go through either the MacFUSE vendor helper or the osxfuse
//! kernel-extension ioctl handshake (spec §4.4); NFS mounts build an XDR
//! attribute list understood by the macOS NFS client; bind mounts are not
//! supported on this platform at all.

pub mod macfuse;
pub mod nfs;
pub mod osxfuse;

use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{info, warn};
use nix::sys::statvfs::statvfs;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::nfs_options::NfsMountOptions;

use super::options::UnmountOptions;
use super::MountBackend;

const BIND_UNMOUNT_POLL_GRACE: Duration = Duration::from_secs(2);
const BIND_UNMOUNT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct MacBackend;

impl MacBackend {
    pub fn new() -> Self {
        MacBackend
    }
}

impl Default for MacBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MountBackend for MacBackend {
    fn fuse_mount(
        &self,
        path: &Path,
        read_only: bool,
        vfs_type: &str,
        cfg: &BrokerConfig,
    ) -> Result<OwnedFd> {
        // Prefer MacFUSE; if it throws (it refuses read-only mounts
        // outright, among other reasons), fall back to osxfuse.
        match macfuse::mount(path, read_only, vfs_type) {
            Ok(fd) => Ok(fd),
            Err(err) => {
                warn!(
                    "MacFUSE mount of {} failed ({err}); falling back to osxfuse",
                    path.display()
                );
                osxfuse::mount(path, read_only, vfs_type, cfg)
            }
        }
    }

    fn nfs_mount(&self, path: &Path, options: &NfsMountOptions) -> Result<()> {
        nfs::mount(path, options)
    }

    fn bind_mount(&self, _client_path: &Path, _mount_path: &Path) -> Result<()> {
        Err(BrokerError::validation("bind mounts are not supported on macOS"))
    }

    fn unmount(&self, path: &Path, options: UnmountOptions) -> Result<()> {
        options.check()?;
        let path_c = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| BrokerError::validation("mount path contains a NUL byte"))?;
        let flags = if options.force { libc::MNT_FORCE } else { 0 };
        let rc = unsafe { libc::unmount(path_c.as_ptr(), flags) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINVAL) {
                return Ok(());
            }
            return Err(BrokerError::system(format!("unmounting {}", path.display()), err));
        }
        info!("unmounted {}", path.display());
        Ok(())
    }

    fn bind_unmount(&self, path: &Path) -> Result<()> {
        let before = statvfs(path).ok().map(|v| v.filesystem_id());
        self.unmount(
            path,
            UnmountOptions {
                force: true,
                detach: true,
                expire: false,
            },
        )?;
        let deadline = Instant::now() + BIND_UNMOUNT_POLL_GRACE;
        loop {
            match statvfs(path) {
                Err(_) => break,
                Ok(v) if Some(v.filesystem_id()) != before => break,
                Ok(_) => {}
            }
            if Instant::now() >= deadline {
                warn!(
                    "bind unmount of {} did not converge within {:?}; proceeding anyway",
                    path.display(),
                    BIND_UNMOUNT_POLL_GRACE
                );
                break;
            }
            std::thread::sleep(BIND_UNMOUNT_POLL_INTERVAL);
        }
        Ok(())
    }

    fn set_log_file(&self, fd: OwnedFd) -> Result<()> {
        use std::os::fd::AsFd;
        nix::unistd::dup2_stdout(fd.as_fd())
            .map_err(|err| BrokerError::system("redirecting stdout to new log file", err.into()))?;
        nix::unistd::dup2_stderr(fd.as_fd())
            .map_err(|err| BrokerError::system("redirecting stderr to new log file", err.into()))?;
        Ok(())
    }

    fn set_memory_priority(&self, pid: u32, priority: i32) -> Result<()> {
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid, priority) };
        if rc != 0 {
            return Err(BrokerError::system(
                format!("setting memory priority for pid {pid}"),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}
