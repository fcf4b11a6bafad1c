//! Response body encoding, per kind (spec §4.2).

use std::os::fd::{BorrowedFd, OwnedFd};

use crate::error::BrokerError;

use super::codec::Writer;
use super::header::{MessageKind, PacketHeader};

#[derive(Debug)]
pub enum Response {
    Empty,
    /// `MOUNT_FUSE` carries the fuse device fd back to the client.
    FuseMounted { device: OwnedFd },
    Pid(u32),
    FamStarted { child_pid: u32 },
    FamStopped {
        tmp_output_path: String,
        final_output_path: String,
        should_upload: bool,
    },
}

impl Response {
    /// Encode this response's body and collect any fds that must ride
    /// along in the frame's ancillary data.
    pub fn encode(&self) -> (Vec<u8>, Vec<OwnedFd>) {
        let mut w = Writer::new();
        let fds = match self {
            Response::Empty => Vec::new(),
            Response::FuseMounted { .. } => Vec::new(),
            Response::Pid(pid) => {
                w.u32(*pid);
                Vec::new()
            }
            Response::FamStarted { child_pid } => {
                w.u32(*child_pid);
                Vec::new()
            }
            Response::FamStopped {
                tmp_output_path,
                final_output_path,
                should_upload,
            } => {
                w.string(tmp_output_path);
                w.string(final_output_path);
                w.bool(*should_upload);
                Vec::new()
            }
        };
        (w.into_bytes(), fds)
    }

    /// Borrowed fds to attach to the frame; `FuseMounted` is handled
    /// specially since the fd is owned by the response itself.
    pub fn fds(&self) -> Vec<BorrowedFd<'_>> {
        match self {
            Response::FuseMounted { device } => vec![device.as_fd_ref()],
            _ => Vec::new(),
        }
    }
}

trait AsFdRef {
    fn as_fd_ref(&self) -> BorrowedFd<'_>;
}

impl AsFdRef for OwnedFd {
    fn as_fd_ref(&self) -> BorrowedFd<'_> {
        use std::os::fd::AsFd;
        self.as_fd()
    }
}

/// Encode the wire-level exception record for a `RESP_ERROR` response:
/// `{kind: u8, message: string, has_errno: bool, errno: i32}`.
pub fn encode_error(err: &BrokerError) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(err.wire_kind());
    w.string(&err.to_string());
    match err.raw_os_error() {
        Some(code) => {
            w.bool(true);
            w.i32(code);
        }
        None => {
            w.bool(false);
        }
    }
    w.into_bytes()
}

/// Build the response header for a successful handler result.
pub fn success_header(request: &PacketHeader, kind: MessageKind) -> PacketHeader {
    request.response(kind.wire())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::codec::Reader;
    use crate::proto::header::CURRENT_VERSION;

    #[test]
    fn pid_response_encodes_big_endian_u32() {
        let resp = Response::Pid(4242);
        let (body, fds) = resp.encode();
        assert!(fds.is_empty());
        assert_eq!(body.len(), 4);
        let mut r = Reader::new(&body);
        assert_eq!(r.u32().unwrap(), 4242);
    }

    #[test]
    fn error_record_round_trips_message_and_errno() {
        let err = BrokerError::domain("/etc/shadow is not a known mount");
        let bytes = encode_error(&err);
        let mut r = Reader::new(&bytes);
        assert_eq!(r.u8().unwrap(), err.wire_kind());
        let msg = r.string().unwrap();
        assert!(msg.contains("/etc/shadow"));
        assert!(!r.bool().unwrap());
    }

    #[test]
    fn success_header_echoes_txid_with_matched_kind() {
        let req = PacketHeader {
            version: CURRENT_VERSION,
            transaction_id: 9,
            message_kind: MessageKind::MountBind.wire(),
        };
        let resp = success_header(&req, MessageKind::MountBind);
        assert_eq!(resp.transaction_id, 9);
        assert_eq!(resp.message_kind, MessageKind::MountBind.wire());
    }
}
