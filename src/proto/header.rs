//! Fixed packet header shared by every request and response.

use crate::error::BrokerError;

/// The protocol version this implementation speaks. Handlers must accept
/// any version up to and including this one and reply using the same
/// version the request carried.
pub const CURRENT_VERSION: u32 = 1;

/// Sentinel kind used on a response in place of the request's kind when the
/// handler failed.
pub const RESP_ERROR: u32 = u32::MAX;

pub const HEADER_LEN: usize = 12;

/// `{version, transaction_id, message_kind}`, always encoded big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u32,
    pub transaction_id: u32,
    pub message_kind: u32,
}

impl PacketHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&self.message_kind.to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), BrokerError> {
        if buf.len() < HEADER_LEN {
            return Err(BrokerError::protocol("frame shorter than packet header"));
        }
        let version = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let transaction_id = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let message_kind = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        Ok((
            PacketHeader {
                version,
                transaction_id,
                message_kind,
            },
            &buf[HEADER_LEN..],
        ))
    }

    /// A response header echoing this request's transaction id and version.
    pub fn response(&self, message_kind: u32) -> Self {
        PacketHeader {
            version: self.version,
            transaction_id: self.transaction_id,
            message_kind,
        }
    }

    pub fn error_response(&self) -> Self {
        self.response(RESP_ERROR)
    }
}

/// Request kinds, per the wire table. Discriminants are the on-wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageKind {
    MountFuse = 0,
    MountNfs = 1,
    MountBind = 2,
    UnmountFuse = 3,
    UnmountNfs = 4,
    UnmountBind = 5,
    TakeoverStartup = 6,
    TakeoverShutdown = 7,
    SetLogFile = 8,
    SetDaemonTimeout = 9,
    SetUseEdenfs = 10,
    GetPid = 11,
    StartFam = 12,
    StopFam = 13,
    SetMemoryPriority = 14,
}

impl MessageKind {
    pub fn from_wire(kind: u32) -> Result<Self, BrokerError> {
        Ok(match kind {
            0 => MessageKind::MountFuse,
            1 => MessageKind::MountNfs,
            2 => MessageKind::MountBind,
            3 => MessageKind::UnmountFuse,
            4 => MessageKind::UnmountNfs,
            5 => MessageKind::UnmountBind,
            6 => MessageKind::TakeoverStartup,
            7 => MessageKind::TakeoverShutdown,
            8 => MessageKind::SetLogFile,
            9 => MessageKind::SetDaemonTimeout,
            10 => MessageKind::SetUseEdenfs,
            11 => MessageKind::GetPid,
            12 => MessageKind::StartFam,
            13 => MessageKind::StopFam,
            14 => MessageKind::SetMemoryPriority,
            other => return Err(BrokerError::protocol(format!("unknown message kind {other}"))),
        })
    }

    pub fn wire(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = PacketHeader {
            version: CURRENT_VERSION,
            transaction_id: 7,
            message_kind: MessageKind::MountFuse.wire(),
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let (decoded, rest) = PacketHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn response_echoes_txid_and_version() {
        let req = PacketHeader {
            version: CURRENT_VERSION,
            transaction_id: 42,
            message_kind: MessageKind::GetPid.wire(),
        };
        let resp = req.error_response();
        assert_eq!(resp.transaction_id, 42);
        assert_eq!(resp.version, CURRENT_VERSION);
        assert_eq!(resp.message_kind, RESP_ERROR);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(PacketHeader::decode(&[0u8; 4]).is_err());
    }
}
