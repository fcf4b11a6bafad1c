//! Request body decoding, per kind (spec §4.2).

use std::os::fd::OwnedFd;

use crate::error::BrokerError;
use crate::mount::options::UnmountOptions;
use crate::nfs_options::NfsMountOptions;

use super::codec::Reader;
use super::header::MessageKind;

#[derive(Debug)]
pub enum Request {
    MountFuse {
        path: String,
        read_only: bool,
        vfs_type: String,
    },
    MountNfs {
        path: String,
        options: NfsMountOptions,
    },
    MountBind {
        client_path: String,
        mount_path: String,
    },
    UnmountFuse {
        path: String,
        options: UnmountOptions,
    },
    UnmountNfs {
        path: String,
    },
    UnmountBind {
        path: String,
    },
    TakeoverStartup {
        mount_path: String,
        bind_mounts: Vec<String>,
    },
    TakeoverShutdown {
        mount_path: String,
    },
    /// Body is empty; the one fd is carried in the frame's ancillary data.
    SetLogFile { fd: Option<OwnedFd> },
    SetDaemonTimeout {
        duration_ns: u64,
    },
    SetUseEdenfs {
        enabled: bool,
    },
    GetPid,
    StartFam {
        path_prefixes: Vec<String>,
        tmp_output_path: String,
        final_output_path: String,
        should_upload: bool,
    },
    StopFam,
    SetMemoryPriority {
        pid: u32,
        priority: i32,
    },
}

impl Request {
    /// Decode a request body, given the kind from the packet header and any
    /// fds that arrived in the same frame.
    pub fn decode(
        kind: MessageKind,
        body: &[u8],
        mut fds: Vec<OwnedFd>,
    ) -> Result<Self, BrokerError> {
        let mut r = Reader::new(body);
        Ok(match kind {
            MessageKind::MountFuse => {
                let path = r.string()?;
                let read_only = r.bool()?;
                let vfs_type = r.string()?;
                Request::MountFuse {
                    path,
                    read_only,
                    vfs_type,
                }
            }
            MessageKind::MountNfs => {
                let path = r.string()?;
                let options = NfsMountOptions::decode(&mut r)?;
                Request::MountNfs { path, options }
            }
            MessageKind::MountBind => {
                let client_path = r.string()?;
                let mount_path = r.string()?;
                Request::MountBind {
                    client_path,
                    mount_path,
                }
            }
            MessageKind::UnmountFuse => {
                let path = r.string()?;
                let options = UnmountOptions::decode(&mut r)?;
                Request::UnmountFuse { path, options }
            }
            MessageKind::UnmountNfs => Request::UnmountNfs { path: r.string()? },
            MessageKind::UnmountBind => Request::UnmountBind { path: r.string()? },
            MessageKind::TakeoverStartup => {
                let mount_path = r.string()?;
                let bind_mounts = r.string_list()?;
                Request::TakeoverStartup {
                    mount_path,
                    bind_mounts,
                }
            }
            MessageKind::TakeoverShutdown => Request::TakeoverShutdown {
                mount_path: r.string()?,
            },
            MessageKind::SetLogFile => {
                if fds.len() > 1 {
                    return Err(BrokerError::validation(
                        "SET_LOG_FILE carried more than one fd",
                    ));
                }
                Request::SetLogFile { fd: fds.pop() }
            }
            MessageKind::SetDaemonTimeout => Request::SetDaemonTimeout {
                duration_ns: r.u64()?,
            },
            MessageKind::SetUseEdenfs => Request::SetUseEdenfs {
                enabled: r.bool()?,
            },
            MessageKind::GetPid => Request::GetPid,
            MessageKind::StartFam => {
                let path_prefixes = r.string_list()?;
                let tmp_output_path = r.string()?;
                let final_output_path = r.string()?;
                let should_upload = r.bool()?;
                Request::StartFam {
                    path_prefixes,
                    tmp_output_path,
                    final_output_path,
                    should_upload,
                }
            }
            MessageKind::StopFam => Request::StopFam,
            MessageKind::SetMemoryPriority => {
                let pid = r.u32()?;
                let priority = r.i32()?;
                Request::SetMemoryPriority { pid, priority }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::codec::Writer;

    #[test]
    fn decodes_mount_fuse() {
        let mut w = Writer::new();
        w.string("/tmp/m1").bool(false).string("fuse");
        let body = w.into_bytes();
        let req = Request::decode(MessageKind::MountFuse, &body, Vec::new()).unwrap();
        match req {
            Request::MountFuse {
                path,
                read_only,
                vfs_type,
            } => {
                assert_eq!(path, "/tmp/m1");
                assert!(!read_only);
                assert_eq!(vfs_type, "fuse");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn set_log_file_requires_exactly_one_fd() {
        let file_a = std::fs::File::open("/dev/null").unwrap();
        let file_b = std::fs::File::open("/dev/null").unwrap();
        let two_fds = vec![file_a.into(), file_b.into()];
        let err = Request::decode(MessageKind::SetLogFile, &[], two_fds).unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));

        let req = Request::decode(MessageKind::SetLogFile, &[], Vec::new()).unwrap();
        match req {
            Request::SetLogFile { fd } => assert!(fd.is_none()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_get_pid_and_stop_fam_with_empty_body() {
        assert!(matches!(
            Request::decode(MessageKind::GetPid, &[], Vec::new()).unwrap(),
            Request::GetPid
        ));
        assert!(matches!(
            Request::decode(MessageKind::StopFam, &[], Vec::new()).unwrap(),
            Request::StopFam
        ));
    }
}
