//! Length-prefixed frames over a connected stream socket, with out-of-band
//! file descriptor passing (`SCM_RIGHTS`).
//!
//! This layer never interprets payload bytes: it hands the packet codec an
//! opaque byte buffer plus whatever fds arrived alongside it. File
//! descriptors are always attached to the `sendmsg` call that carries the
//! first byte of a frame; on `AF_UNIX` stream sockets the kernel will not
//! let a single `recvmsg` read span past a control-message boundary, so it
//! is always safe to attach ancillary fds only on the read that starts a
//! fresh frame.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

const LEN_PREFIX: usize = 4;
/// Generous but bounded: refuses to allocate unbounded memory for a
/// corrupt or hostile length prefix.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// One decoded frame: opaque payload bytes plus any fds that rode along
/// with it.
#[derive(Debug)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub fds: Vec<OwnedFd>,
}

/// What a receive attempt produced.
pub enum RecvOutcome {
    Frame(Frame),
    /// The peer closed its end cleanly (0-byte read at a frame boundary).
    Eof,
}

/// Frame codec bound to one connected stream socket.
#[derive(Debug)]
pub struct FrameIo {
    socket: UnixStream,
}

impl FrameIo {
    pub fn new(socket: UnixStream) -> Self {
        FrameIo { socket }
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    /// Receive one complete frame, blocking until it arrives or the peer
    /// closes the socket.
    pub fn recv(&mut self) -> io::Result<RecvOutcome> {
        let mut buf = Vec::new();
        let mut fds = Vec::new();
        let mut read_any_fds = false;

        loop {
            let want = if buf.len() < LEN_PREFIX {
                LEN_PREFIX - buf.len()
            } else {
                let len = u32::from_be_bytes(buf[0..LEN_PREFIX].try_into().unwrap());
                if len > MAX_FRAME_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
                    ));
                }
                let total = LEN_PREFIX + len as usize;
                if buf.len() >= total {
                    let payload = buf[LEN_PREFIX..total].to_vec();
                    return Ok(RecvOutcome::Frame(Frame { payload, fds }));
                }
                total - buf.len()
            };

            let mut chunk = vec![0u8; want];
            let mut cmsg_space = nix::cmsg_space!([std::os::fd::RawFd; 8]);
            let received = {
                let mut iov = [IoSliceMut::new(&mut chunk)];
                socket::recvmsg::<()>(
                    self.socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsg_space),
                    MsgFlags::empty(),
                )
                .map_err(io::Error::from)?
            };

            if !read_any_fds {
                for cmsg in received.cmsgs().map_err(io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                        for raw in raw_fds {
                            // Safety: the kernel just handed us ownership of
                            // this fd via SCM_RIGHTS.
                            fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
                        }
                    }
                }
                read_any_fds = true;
            }

            let n = received.bytes;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(RecvOutcome::Eof);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed socket mid-frame",
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send one complete frame in a single `sendmsg` call so that any fds
    /// land on the same control-message boundary as the frame's first
    /// byte.
    pub fn send(&mut self, payload: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large to send"))?;
        let header = len.to_be_bytes();
        let iov = [IoSlice::new(&header), IoSlice::new(payload)];

        let raw_fds: Vec<std::os::fd::RawFd> = fds.iter().map(|f| f.as_raw_fd()).collect();
        let cmsgs = if raw_fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(&raw_fds)]
        };

        socket::sendmsg::<()>(
            self.socket.as_raw_fd(),
            &iov,
            &cmsgs,
            MsgFlags::empty(),
            None,
        )
        .map_err(io::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_frame_without_fds() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut sender = FrameIo::new(a);
        let mut receiver = FrameIo::new(b);

        sender.send(b"hello", &[]).unwrap();
        match receiver.recv().unwrap() {
            RecvOutcome::Frame(frame) => {
                assert_eq!(frame.payload, b"hello");
                assert!(frame.fds.is_empty());
            }
            RecvOutcome::Eof => panic!("expected a frame"),
        }
    }

    #[test]
    fn round_trips_a_frame_with_an_fd() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut sender = FrameIo::new(a);
        let mut receiver = FrameIo::new(b);

        let tmp = std::fs::File::open("/dev/null").unwrap();
        sender.send(b"fd-bearing", &[tmp.as_fd()]).unwrap();
        match receiver.recv().unwrap() {
            RecvOutcome::Frame(frame) => {
                assert_eq!(frame.payload, b"fd-bearing");
                assert_eq!(frame.fds.len(), 1);
            }
            RecvOutcome::Eof => panic!("expected a frame"),
        }
    }

    #[test]
    fn peer_close_yields_eof() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let mut receiver = FrameIo::new(b);
        match receiver.recv().unwrap() {
            RecvOutcome::Eof => {}
            RecvOutcome::Frame(_) => panic!("expected eof"),
        }
    }
}
