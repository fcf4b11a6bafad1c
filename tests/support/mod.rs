//! Test double for [`mount_broker::mount::MountBackend`], plus small wire
//! helpers for driving the dispatcher end to end over a socket pair.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::sync::{Arc, Mutex};

use mount_broker::config::BrokerConfig;
use mount_broker::error::{BrokerError, Result};
use mount_broker::mount::options::UnmountOptions;
use mount_broker::mount::MountBackend;
use mount_broker::nfs_options::NfsMountOptions;
use mount_broker::proto::codec::Writer;
use mount_broker::proto::{FrameIo, MessageKind, PacketHeader, RecvOutcome, CURRENT_VERSION};

#[derive(Debug, Clone, Default)]
pub struct FakeMountBackend {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_bind_mount: Arc<Mutex<bool>>,
}

impl FakeMountBackend {
    pub fn new() -> Self {
        FakeMountBackend::default()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl MountBackend for FakeMountBackend {
    fn fuse_mount(
        &self,
        path: &Path,
        _read_only: bool,
        _vfs_type: &str,
        _cfg: &BrokerConfig,
    ) -> Result<OwnedFd> {
        self.record(format!("fuse_mount {}", path.display()));
        let dev_null = File::open("/dev/null").map_err(|err| BrokerError::system("opening /dev/null", err))?;
        Ok(dev_null.into())
    }

    fn nfs_mount(&self, path: &Path, _options: &NfsMountOptions) -> Result<()> {
        self.record(format!("nfs_mount {}", path.display()));
        Ok(())
    }

    fn bind_mount(&self, client_path: &Path, mount_path: &Path) -> Result<()> {
        self.record(format!(
            "bind_mount {} {}",
            client_path.display(),
            mount_path.display()
        ));
        if *self.fail_bind_mount.lock().unwrap() {
            return Err(BrokerError::system(
                "bind mounting",
                std::io::Error::from_raw_os_error(libc::EPERM),
            ));
        }
        Ok(())
    }

    fn unmount(&self, path: &Path, _options: UnmountOptions) -> Result<()> {
        self.record(format!("unmount {}", path.display()));
        Ok(())
    }

    fn bind_unmount(&self, path: &Path) -> Result<()> {
        self.record(format!("bind_unmount {}", path.display()));
        Ok(())
    }

    fn set_log_file(&self, _fd: OwnedFd) -> Result<()> {
        self.record("set_log_file");
        Ok(())
    }

    fn set_memory_priority(&self, pid: u32, priority: i32) -> Result<()> {
        self.record(format!("set_memory_priority {pid} {priority}"));
        Ok(())
    }
}

/// A pair of connected `FrameIo`s: one to hand to a `Dispatcher`, one to act
/// as the test's client.
pub fn socket_pair() -> (FrameIo, FrameIo) {
    let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
    (FrameIo::new(a), FrameIo::new(b))
}

/// The test's end of a dispatcher connection.
pub struct TestClient {
    io: FrameIo,
}

impl TestClient {
    pub fn new(io: FrameIo) -> Self {
        TestClient { io }
    }

    pub fn send(&mut self, payload: &[u8]) {
        self.io.send(payload, &[]).unwrap();
    }

    /// Returns the decoded response payload and how many fds rode along.
    pub fn recv(&mut self) -> (Vec<u8>, usize) {
        match self.io.recv().unwrap() {
            RecvOutcome::Frame(frame) => (frame.payload, frame.fds.len()),
            RecvOutcome::Eof => panic!("expected a response frame"),
        }
    }
}

/// Encode a full request frame payload: header + pre-built body.
pub fn request_payload(txid: u32, kind: MessageKind, body: &[u8]) -> Vec<u8> {
    let header = PacketHeader {
        version: CURRENT_VERSION,
        transaction_id: txid,
        message_kind: kind.wire(),
    };
    let mut out = Vec::new();
    header.encode(&mut out);
    out.extend_from_slice(body);
    out
}

pub fn mount_fuse_body(path: &str, read_only: bool, vfs_type: &str) -> Vec<u8> {
    let mut w = Writer::new();
    w.string(path).bool(read_only).string(vfs_type);
    w.into_bytes()
}

pub fn unmount_fuse_body(path: &str, options: UnmountOptions) -> Vec<u8> {
    let mut w = Writer::new();
    w.string(path);
    options.encode(&mut w);
    w.into_bytes()
}

pub fn mount_bind_body(client_path: &str, mount_path: &str) -> Vec<u8> {
    let mut w = Writer::new();
    w.string(client_path).string(mount_path);
    w.into_bytes()
}

pub fn path_body(path: &str) -> Vec<u8> {
    let mut w = Writer::new();
    w.string(path);
    w.into_bytes()
}
