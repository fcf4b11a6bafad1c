//! MacFUSE vendor helper mount (spec §4.4).
//!
//! MacFUSE refuses read-only mounts. A successful mount spawns
//! `mount_macfuse`, which blocks until the *caller* completes the FUSE init
//! handshake over the fd it hands back, so the broker must never wait for
//! that child synchronously on the handler's thread, or the whole machine
//! deadlocks. The wait is therefore moved to a detached thread; the
//! device fd comes back over a socketpair via `SCM_RIGHTS` instead.

use std::io::{self, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::Command;
use std::thread;

use log::{error, warn};
use nix::sys::socket::{self, ControlMessageOwned, MsgFlags};

use crate::error::{BrokerError, Result};

const MACFUSE_HELPER: &str = "mount_macfuse";

pub fn mount(path: &Path, read_only: bool, vfs_type: &str) -> Result<OwnedFd> {
    if read_only {
        return Err(BrokerError::validation(
            "MacFUSE does not support read-only mounts",
        ));
    }

    let (parent_end, child_end) = UnixStream::pair()
        .map_err(|err| BrokerError::system("creating macfuse handshake socketpair", err))?;

    let own_exe = std::env::current_exe()
        .map_err(|err| BrokerError::system("resolving own executable path for macfuse", err))?;

    let mut child = Command::new(MACFUSE_HELPER)
        .arg("-o")
        .arg(format!("allow_other,default_permissions,fsname={vfs_type}"))
        .arg(path)
        .env("_FUSE_CALL_BY_LIB", "1")
        .env("_FUSE_COMMFD", child_end.as_raw_fd().to_string())
        .env("_FUSE_COMMVERS", "2")
        .env("_FUSE_DAEMON_PATH", &own_exe)
        .spawn()
        .map_err(|err| BrokerError::subprocess(format!("spawning {MACFUSE_HELPER}: {err}")))?;

    // The helper inherited its end of the pair across fork/exec; our copy
    // must be dropped so EOF on `parent_end` is meaningful.
    drop(child_end);

    // mount_macfuse blocks until our process completes the FUSE init
    // handshake on the fd it's about to hand us, which only happens after
    // this call returns and the dispatcher starts serving the mount. Never
    // join this on the calling thread.
    thread::Builder::new()
        .name("macfuse-wait".into())
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                warn!("{MACFUSE_HELPER} exited with {status}");
            }
            Err(err) => error!("failed to wait on {MACFUSE_HELPER}: {err}"),
            Ok(_) => {}
        })
        .map_err(|err| BrokerError::system("spawning macfuse wait thread", err))?;

    recv_fd(&parent_end)
}

fn recv_fd(socket: &UnixStream) -> Result<OwnedFd> {
    let mut byte = [0u8; 1];
    loop {
        let mut cmsg_space = nix::cmsg_space!([std::os::fd::RawFd; 1]);
        let mut iov = [IoSliceMut::new(&mut byte)];
        let received = match socket::recvmsg::<()>(
            socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_space),
            MsgFlags::empty(),
        ) {
            Ok(msg) => msg,
            Err(nix::Error::EINTR) => continue,
            Err(err) => {
                return Err(BrokerError::system(
                    "receiving macfuse device fd",
                    io::Error::from(err),
                ))
            }
        };

        if received.bytes == 0 {
            return Err(BrokerError::subprocess(
                "macfuse helper closed the handshake socket before sending a device fd",
            ));
        }

        for cmsg in received
            .cmsgs()
            .map_err(|err| BrokerError::system("parsing macfuse handshake ancillary data", io::Error::from(err)))?
        {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                if let Some(raw) = fds.into_iter().next() {
                    // Safety: the kernel just handed us ownership via
                    // SCM_RIGHTS.
                    return Ok(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }

        return Err(BrokerError::subprocess(
            "macfuse helper sent a handshake byte without a device fd",
        ));
    }
}
