//! Single-threaded dispatcher / event loop (spec §4.6).
//!
//! Owns the mount registry, the FAM supervisor, and the broker's own
//! configuration. Nothing here is shared across threads: the only
//! concurrency in the process is the detached auxiliary threads some mount
//! backends spawn (§4.4), which never touch this state.

use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::statvfs::statvfs;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::fam::FamSupervisor;
use crate::mount::options::UnmountOptions;
use crate::mount::MountBackend;
use crate::proto::{Frame, FrameIo, MessageKind, PacketHeader, Request, Response, RecvOutcome};
use crate::registry::MountRegistry;

pub struct Dispatcher<B: MountBackend> {
    io: FrameIo,
    backend: B,
    config: BrokerConfig,
    registry: MountRegistry,
    fam: FamSupervisor,
}

impl<B: MountBackend> Dispatcher<B> {
    pub fn new(io: FrameIo, backend: B, config: BrokerConfig) -> Self {
        Dispatcher {
            io,
            backend,
            config,
            registry: MountRegistry::new(),
            fam: FamSupervisor::new(),
        }
    }

    /// Run until the peer disconnects or a receive error occurs, then clean
    /// up every mount this broker believes it owns.
    pub fn run(&mut self) {
        loop {
            let frame = match self.io.recv() {
                Ok(RecvOutcome::Frame(frame)) => frame,
                Ok(RecvOutcome::Eof) => {
                    debug!("peer closed the socket; shutting down");
                    break;
                }
                Err(err) => {
                    error!("frame receive error: {err}; shutting down");
                    break;
                }
            };
            self.handle_frame(frame);
        }
        self.cleanup();
    }

    fn handle_frame(&mut self, frame: Frame) {
        let (header, body) = match PacketHeader::decode(&frame.payload) {
            Ok(pair) => pair,
            Err(err) => {
                warn!("dropping unparsable frame: {err}");
                return;
            }
        };

        let result = MessageKind::from_wire(header.message_kind)
            .map_err(BrokerError::from)
            .and_then(|kind| {
                let fds: Vec<_> = frame.fds;
                let request = Request::decode(kind, body, fds)?;
                self.handle_request(request)
            });

        match result {
            Ok((kind, response)) => {
                let (body, _owned_fds) = response.encode();
                let mut out = Vec::new();
                crate::proto::response::success_header(&header, kind).encode(&mut out);
                out.extend_from_slice(&body);
                let borrowed = response.fds();
                if let Err(err) = self.io.send(&out, &borrowed) {
                    error!("failed to send response: {err}; shutting down");
                }
            }
            Err(err) => {
                warn!("request {} failed: {err}", header.transaction_id);
                let mut out = Vec::new();
                header.error_response().encode(&mut out);
                out.extend_from_slice(&crate::proto::response::encode_error(&err));
                if let Err(err) = self.io.send(&out, &[]) {
                    error!("failed to send error response: {err}; shutting down");
                }
            }
        }
    }

    fn handle_request(&mut self, request: Request) -> Result<(MessageKind, Response)> {
        match request {
            Request::MountFuse {
                path,
                read_only,
                vfs_type,
            } => {
                let path = PathBuf::from(path);
                sanity_check_mountpoint(&path)?;
                detect_and_unmount_stale_mount(&self.backend, &path);
                let device = self.backend.fuse_mount(&path, read_only, &vfs_type, &self.config)?;
                self.registry.insert(path.to_string_lossy().into_owned());
                Ok((MessageKind::MountFuse, Response::FuseMounted { device }))
            }
            Request::MountNfs { path, options } => {
                let path = PathBuf::from(path);
                sanity_check_mountpoint(&path)?;
                detect_and_unmount_stale_mount(&self.backend, &path);
                self.backend.nfs_mount(&path, &options)?;
                self.registry.insert(path.to_string_lossy().into_owned());
                Ok((MessageKind::MountNfs, Response::Empty))
            }
            Request::MountBind {
                client_path,
                mount_path,
            } => {
                self.registry
                    .find_prefix(&mount_path)
                    .ok_or_else(|| BrokerError::domain(mount_path.clone()))?;
                let client_path = PathBuf::from(client_path);
                let mount_path = PathBuf::from(mount_path);
                sanity_check_mountpoint(&mount_path)?;
                self.backend.bind_mount(&client_path, &mount_path)?;
                self.registry.insert(mount_path.to_string_lossy().into_owned());
                Ok((MessageKind::MountBind, Response::Empty))
            }
            Request::UnmountFuse { path, options } => {
                self.unmount_owned(&path, options)?;
                Ok((MessageKind::UnmountFuse, Response::Empty))
            }
            Request::UnmountNfs { path } => {
                self.unmount_owned(&path, UnmountOptions { force: false, detach: true, expire: false })?;
                Ok((MessageKind::UnmountNfs, Response::Empty))
            }
            Request::UnmountBind { path } => {
                self.registry
                    .find_prefix(&path)
                    .ok_or_else(|| BrokerError::domain(path.clone()))?;
                self.backend.bind_unmount(Path::new(&path))?;
                self.registry.remove(&path);
                Ok((MessageKind::UnmountBind, Response::Empty))
            }
            Request::TakeoverStartup {
                mount_path,
                bind_mounts,
            } => {
                // All paths in the set are adopted atomically (spec §G.3).
                self.registry.insert(mount_path);
                for bind in bind_mounts {
                    self.registry.insert(bind);
                }
                Ok((MessageKind::TakeoverStartup, Response::Empty))
            }
            Request::TakeoverShutdown { mount_path } => {
                self.registry.remove(&mount_path);
                Ok((MessageKind::TakeoverShutdown, Response::Empty))
            }
            Request::SetLogFile { fd } => {
                let fd = fd.ok_or_else(|| {
                    BrokerError::validation("SET_LOG_FILE requires exactly one fd")
                })?;
                self.backend.set_log_file(fd)?;
                Ok((MessageKind::SetLogFile, Response::Empty))
            }
            Request::SetDaemonTimeout { duration_ns } => {
                self.config.fuse_timeout = std::time::Duration::from_nanos(duration_ns);
                Ok((MessageKind::SetDaemonTimeout, Response::Empty))
            }
            Request::SetUseEdenfs { enabled } => {
                self.config.use_dev_edenfs = enabled;
                Ok((MessageKind::SetUseEdenfs, Response::Empty))
            }
            Request::GetPid => {
                Ok((MessageKind::GetPid, Response::Pid(std::process::id())))
            }
            Request::StartFam {
                path_prefixes,
                tmp_output_path,
                final_output_path,
                should_upload,
            } => {
                let child_pid =
                    self.fam
                        .start(path_prefixes, tmp_output_path, final_output_path, should_upload)?;
                Ok((MessageKind::StartFam, Response::FamStarted { child_pid }))
            }
            Request::StopFam => {
                let (tmp_output_path, final_output_path, should_upload) = self.fam.stop()?;
                Ok((
                    MessageKind::StopFam,
                    Response::FamStopped {
                        tmp_output_path,
                        final_output_path,
                        should_upload,
                    },
                ))
            }
            Request::SetMemoryPriority { pid, priority } => {
                self.backend.set_memory_priority(pid, priority)?;
                Ok((MessageKind::SetMemoryPriority, Response::Empty))
            }
        }
    }

    /// Authorize against the registry, then delegate to the backend's
    /// shared unmount procedure (spec §4.4 makes no FUSE/NFS distinction at
    /// the syscall level).
    fn unmount_owned(&mut self, path: &str, options: UnmountOptions) -> Result<()> {
        self.registry
            .find_prefix(path)
            .ok_or_else(|| BrokerError::domain(path.to_string()))?;
        self.backend.unmount(Path::new(path), options)?;
        self.registry.remove(path);
        Ok(())
    }

    fn cleanup(&mut self) {
        let mounts: Vec<String> = self.registry.iter().map(String::from).collect();
        for mount in mounts {
            if let Err(err) = self.backend.unmount(
                Path::new(&mount),
                UnmountOptions {
                    force: true,
                    detach: true,
                    expire: false,
                },
            ) {
                warn!("failed to unmount {mount} during shutdown cleanup: {err}");
            }
            self.registry.remove(&mount);
        }
    }
}

/// `sanityCheckMountPoint` in the original: the target must already exist
/// as a directory, not a symlink or regular file (spec §G.2).
fn sanity_check_mountpoint(path: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(path)
        .map_err(|err| BrokerError::system(format!("stat {}", path.display()), err))?;
    if meta.file_type().is_symlink() {
        return Err(BrokerError::validation(format!(
            "mount point {} is a symlink",
            path.display()
        )));
    }
    if !meta.is_dir() {
        return Err(BrokerError::validation(format!(
            "mount point {} is not a directory",
            path.display()
        )));
    }
    Ok(())
}

/// `detectAndUnmountStaleMount` in the original (spec §G.1): if something is
/// already mounted at `path` from an uncleanly-terminated previous session,
/// force-unmount it first. Best-effort; failures are logged, not
/// propagated, since the subsequent mount attempt will surface any real
/// problem on its own.
fn detect_and_unmount_stale_mount(backend: &impl MountBackend, path: &Path) {
    let Ok(before) = statvfs(path) else {
        return;
    };
    let Ok(parent_vfs) = path.parent().map(statvfs).transpose() else {
        return;
    };
    let is_distinct_mount = parent_vfs
        .map(|parent| parent.filesystem_id() != before.filesystem_id())
        .unwrap_or(false);
    if !is_distinct_mount {
        return;
    }
    warn!(
        "detected a stale mount at {}; force-unmounting before remounting",
        path.display()
    );
    if let Err(err) = backend.unmount(
        path,
        UnmountOptions {
            force: true,
            detach: true,
            expire: false,
        },
    ) {
        warn!("failed to clear stale mount at {}: {err}", path.display());
    }
}

/// Install `SIG_IGN` for `SIGINT`/`SIGTERM` so a terminal interrupt to the
/// parent doesn't kill the broker before it can clean up mounts. Never
/// restored; this process lives and dies with its socket peer.
pub fn ignore_interactive_signals() -> Result<()> {
    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::SigIgn)
            .map_err(|err| BrokerError::system("installing SIG_IGN for SIGINT", err.into()))?;
        signal::signal(Signal::SIGTERM, SigHandler::SigIgn)
            .map_err(|err| BrokerError::system("installing SIG_IGN for SIGTERM", err.into()))?;
    }
    Ok(())
}

/// Used by the binary entry point to confirm the inherited socket fd is
/// actually a socket before handing it to [`FrameIo`].
pub fn validate_inherited_fd(fd: &std::os::fd::OwnedFd) -> Result<()> {
    let mut kind: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut kind as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(BrokerError::system(
            "validating inherited socket fd",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}
