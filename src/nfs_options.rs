//! NFS mount options value object (spec §3).

use crate::proto::codec::{Reader, Writer};
use crate::error::BrokerError;

/// Address family for an NFS server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet4,
    Inet6,
    Unix,
}

impl AddressFamily {
    fn to_wire(self) -> u8 {
        match self {
            AddressFamily::Inet4 => 0,
            AddressFamily::Inet6 => 1,
            AddressFamily::Unix => 2,
        }
    }

    fn from_wire(v: u8) -> Result<Self, BrokerError> {
        Ok(match v {
            0 => AddressFamily::Inet4,
            1 => AddressFamily::Inet6,
            2 => AddressFamily::Unix,
            other => return Err(BrokerError::protocol(format!("unknown address family {other}"))),
        })
    }
}

/// A mountd or nfsd endpoint: either `family + address string + optional
/// port` (inet) or `family + unix socket path` (unix domain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsEndpoint {
    pub family: AddressFamily,
    pub address: String,
    pub port: Option<u16>,
}

impl NfsEndpoint {
    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.family.to_wire());
        w.string(&self.address);
        w.option_u16(self.port);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, BrokerError> {
        let family = AddressFamily::from_wire(r.u8()?)?;
        let address = r.string()?;
        let port = r.option_u16()?;
        Ok(NfsEndpoint {
            family,
            address,
            port,
        })
    }
}

/// Tri-state: the original protocol lets the client either say nothing
/// about dumbtimer, or say yes/no explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumbtimerPreference {
    Unset,
    Enabled,
    Disabled,
}

impl DumbtimerPreference {
    fn to_wire(self) -> u8 {
        match self {
            DumbtimerPreference::Unset => 0,
            DumbtimerPreference::Enabled => 1,
            DumbtimerPreference::Disabled => 2,
        }
    }

    fn from_wire(v: u8) -> Result<Self, BrokerError> {
        Ok(match v {
            0 => DumbtimerPreference::Unset,
            1 => DumbtimerPreference::Enabled,
            2 => DumbtimerPreference::Disabled,
            other => {
                return Err(BrokerError::protocol(format!(
                    "unknown dumbtimer preference {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsMountOptions {
    pub mountd: NfsEndpoint,
    pub nfsd: NfsEndpoint,
    pub read_size: u32,
    pub write_size: u32,
    pub readdir_size: Option<u32>,
    pub readahead_size: u32,
    /// Retransmit timeout in tenths of a second, as the client sends it.
    pub retransmit_timeout_tenths: u32,
    pub retransmit_attempts: u32,
    pub dead_timeout_secs: u32,
    pub read_only: bool,
    pub soft_mount: bool,
    pub use_readdirplus: bool,
    pub dumbtimer: DumbtimerPreference,
}

impl NfsMountOptions {
    pub fn encode(&self, w: &mut Writer) {
        self.mountd.encode(w);
        self.nfsd.encode(w);
        w.u32(self.read_size);
        w.u32(self.write_size);
        match self.readdir_size {
            Some(v) => {
                w.bool(true);
                w.u32(v);
            }
            None => {
                w.bool(false);
            }
        }
        w.u32(self.readahead_size);
        w.u32(self.retransmit_timeout_tenths);
        w.u32(self.retransmit_attempts);
        w.u32(self.dead_timeout_secs);
        w.bool(self.read_only);
        w.bool(self.soft_mount);
        w.bool(self.use_readdirplus);
        w.u8(self.dumbtimer.to_wire());
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, BrokerError> {
        let mountd = NfsEndpoint::decode(r)?;
        let nfsd = NfsEndpoint::decode(r)?;
        let read_size = r.u32()?;
        let write_size = r.u32()?;
        let readdir_size = if r.bool()? { Some(r.u32()?) } else { None };
        let readahead_size = r.u32()?;
        let retransmit_timeout_tenths = r.u32()?;
        let retransmit_attempts = r.u32()?;
        let dead_timeout_secs = r.u32()?;
        let read_only = r.bool()?;
        let soft_mount = r.bool()?;
        let use_readdirplus = r.bool()?;
        let dumbtimer = DumbtimerPreference::from_wire(r.u8()?)?;
        Ok(NfsMountOptions {
            mountd,
            nfsd,
            read_size,
            write_size,
            readdir_size,
            readahead_size,
            retransmit_timeout_tenths,
            retransmit_attempts,
            dead_timeout_secs,
            read_only,
            soft_mount,
            use_readdirplus,
            dumbtimer,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> NfsMountOptions {
        NfsMountOptions {
            mountd: NfsEndpoint {
                family: AddressFamily::Inet4,
                address: "127.0.0.1".into(),
                port: Some(2049),
            },
            nfsd: NfsEndpoint {
                family: AddressFamily::Inet4,
                address: "127.0.0.1".into(),
                port: Some(2049),
            },
            read_size: 131072,
            write_size: 131072,
            readdir_size: None,
            readahead_size: 16,
            retransmit_timeout_tenths: 7,
            retransmit_attempts: 3,
            dead_timeout_secs: 60,
            read_only: false,
            soft_mount: false,
            use_readdirplus: true,
            dumbtimer: DumbtimerPreference::Unset,
        }
    }

    #[test]
    fn round_trips() {
        let opts = sample();
        let mut w = Writer::new();
        opts.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = NfsMountOptions::decode(&mut r).unwrap();
        assert_eq!(decoded, opts);
    }
}
