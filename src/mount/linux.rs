//! Linux mount backend: direct `mount(2)`/`umount2(2)` calls against
//! `/dev/fuse`, NFSv3 servers, and bind targets (spec §4.4).
//!
//! The FUSE option-string composition mirrors `fuse_mount_sys` in the
//! teacher crate's `mnt/fuse_direct.rs`, simplified to the fixed option set
//! the broker always requests (`allow_other,default_permissions`) instead
//! of a user-supplied mount-option list.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::statvfs::statvfs;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::nfs_options::{AddressFamily, NfsMountOptions};

use super::options::UnmountOptions;
use super::MountBackend;

const DEV_FUSE: &str = "/dev/fuse";
const EDEN_SOURCE: &str = "edenfs:";
const BIND_UNMOUNT_POLL_GRACE: Duration = Duration::from_secs(2);
const BIND_UNMOUNT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct LinuxBackend;

impl MountBackend for LinuxBackend {
    fn fuse_mount(
        &self,
        path: &Path,
        read_only: bool,
        vfs_type: &str,
        cfg: &BrokerConfig,
    ) -> Result<OwnedFd> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(DEV_FUSE)
            .map_err(|err| {
                if matches!(err.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENOENT)) {
                    BrokerError::system("fuse kernel module is not loaded", err)
                } else {
                    BrokerError::system(format!("opening {DEV_FUSE}"), err)
                }
            })?;
        let fd = device.as_raw_fd();

        let root_mode = path
            .metadata()
            .map_err(|err| BrokerError::system(format!("stat {}", path.display()), err))?
            .mode()
            & libc::S_IFMT as u32;

        let options = format!(
            "allow_other,default_permissions,rootmode={:o},user_id={},group_id={},fd={}",
            root_mode, cfg.uid, cfg.gid, fd
        );

        let mut flags = MsFlags::MS_NOSUID;
        if read_only {
            flags |= MsFlags::MS_RDONLY;
        }

        mount(
            Some(EDEN_SOURCE),
            path,
            Some(vfs_type),
            flags,
            Some(options.as_str()),
        )
        .map_err(|err| {
            BrokerError::system(format!("mounting fuse filesystem at {}", path.display()), err.into())
        })?;

        info!("mounted fuse filesystem at {}", path.display());
        Ok(device.into())
    }

    fn nfs_mount(&self, path: &Path, options: &NfsMountOptions) -> Result<()> {
        if options.nfsd.family == AddressFamily::Unix || options.mountd.family == AddressFamily::Unix {
            return Err(BrokerError::validation(
                "Linux NFS mounts require inet mountd/nfsd addresses",
            ));
        }

        let mut opt_string = format!(
            "addr={},vers=3,proto=tcp,port={},mountvers=3,mountproto=tcp,mountport={},noresvport,nolock,{},{},retrans={},timeo={},rsize={},wsize={}",
            options.nfsd.address,
            options.nfsd.port.unwrap_or(2049),
            options.mountd.port.unwrap_or(0),
            if options.use_readdirplus { "rdirplus" } else { "nordirplus" },
            if options.soft_mount { "soft" } else { "hard" },
            options.retransmit_attempts,
            options.retransmit_timeout_tenths,
            options.read_size,
            options.write_size,
        );
        if options.read_only {
            opt_string.push_str(",ro");
        }

        let source = format!("{EDEN_SOURCE}{}", path.display());
        let mut flags = MsFlags::MS_NOSUID;
        if options.read_only {
            flags |= MsFlags::MS_RDONLY;
        }

        mount(Some(source.as_str()), path, Some("nfs"), flags, Some(opt_string.as_str()))
            .map_err(|err| {
                BrokerError::system(format!("mounting nfs filesystem at {}", path.display()), err.into())
            })?;

        info!("mounted nfs filesystem at {}", path.display());
        Ok(())
    }

    fn bind_mount(&self, client_path: &Path, mount_path: &Path) -> Result<()> {
        mount(
            Some(client_path),
            mount_path,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|err| {
            BrokerError::system(
                format!(
                    "bind mounting {} onto {}",
                    client_path.display(),
                    mount_path.display()
                ),
                err.into(),
            )
        })?;
        debug!("bind mounted {} onto {}", client_path.display(), mount_path.display());
        Ok(())
    }

    fn unmount(&self, path: &Path, options: UnmountOptions) -> Result<()> {
        options.check()?;
        let mut flags = MntFlags::UMOUNT_NOFOLLOW | MntFlags::MNT_DETACH;
        if options.force {
            flags |= MntFlags::MNT_FORCE;
        }
        match umount2(path, flags) {
            Ok(()) => {
                info!("unmounted {}", path.display());
                Ok(())
            }
            Err(nix::Error::EINVAL) => {
                // Already gone.
                Ok(())
            }
            Err(err) => Err(BrokerError::system(
                format!("unmounting {}", path.display()),
                err.into(),
            )),
        }
    }

    fn bind_unmount(&self, path: &Path) -> Result<()> {
        let before = statvfs(path).ok().map(|v| v.filesystem_id());

        self.unmount(
            path,
            UnmountOptions {
                force: false,
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
        nix::unistd::dup2_stdout(fd.as_fd()).map_err(|err| {
            BrokerError::system("redirecting stdout to new log file", err.into())
        })?;
        nix::unistd::dup2_stderr(fd.as_fd()).map_err(|err| {
            BrokerError::system("redirecting stderr to new log file", err.into())
        })?;
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

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bind_mount_and_bind_unmount_roundtrip() {
        let backend = LinuxBackend;
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        std::fs::write(src.path().join("marker"), b"hi").unwrap();

        if backend.bind_mount(src.path(), dst.path()).is_err() {
            // Requires CAP_SYS_ADMIN; skip under unprivileged test runs.
            return;
        }
        assert!(dst.path().join("marker").exists());
        backend.bind_unmount(dst.path()).unwrap();
    }

    #[test]
    fn unmount_rejects_non_detach_options() {
        let backend = LinuxBackend;
        let dir = tempdir().unwrap();
        let err = backend
            .unmount(
                dir.path(),
                UnmountOptions {
                    force: false,
                    detach: false,
                    expire: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
    }
}
