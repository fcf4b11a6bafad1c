//! osxfuse kernel-extension mount handshake (spec §4.4).
//!
//! Opens one of `/dev/osxfuse<N>` or `/dev/edenfs<N>` by probing unit
//! numbers, populates the kernel's mount-args structure, and issues the
//! `mount(2)` syscall on a detached thread because it can perform
//! synchronous filesystem probes that require a running dispatcher loop to
//! complete the FUSE init handshake on the other end of the device fd.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};

const MOUNT_PROBE_WAIT: Duration = Duration::from_millis(50);
const MAX_IO_SIZE: u32 = 1024 * 1024;

const MAXPATHLEN: usize = 1024;
const MFSTYPENAMELEN: usize = 16;

// altflag bit positions; one per field the kext needs to know is populated,
// plus the two mount-option booleans.
const ALTFLAG_RDEV: u32 = 0;
const ALTFLAG_RANDOM: u32 = 1;
const ALTFLAG_VOLNAME: u32 = 2;
const ALTFLAG_FSTYPENAME: u32 = 3;
const ALTFLAG_BLOCKSIZE: u32 = 4;
const ALTFLAG_DAEMON_TIMEOUT: u32 = 5;
const ALTFLAG_MAX_READ: u32 = 6;
const ALTFLAG_ALLOW_OTHER: u32 = 7;
const ALTFLAG_DEFAULT_PERMISSIONS: u32 = 8;

/// The kernel's fixed-size mount-args struct, at the contract level: the
/// broker fills in every field the spec names and computes the matching
/// altflag bitmask, then packs them native-endian (this buffer crosses the
/// syscall boundary directly, not the wire, so no byte-swapping applies).
#[derive(Debug, Clone)]
struct OsxfuseMountArgs {
    mount_path: String,
    rdev: u64,
    random_cookie: u32,
    volume_name: String,
    fs_type: &'static str,
    block_size: u32,
    daemon_timeout_secs: u32,
    max_io_size: u32,
    allow_other: bool,
    default_permissions: bool,
}

impl OsxfuseMountArgs {
    fn altflags(&self) -> u32 {
        let mut bits = 1 << ALTFLAG_RDEV
            | 1 << ALTFLAG_RANDOM
            | 1 << ALTFLAG_VOLNAME
            | 1 << ALTFLAG_FSTYPENAME
            | 1 << ALTFLAG_BLOCKSIZE
            | 1 << ALTFLAG_DAEMON_TIMEOUT
            | 1 << ALTFLAG_MAX_READ;
        if self.allow_other {
            bits |= 1 << ALTFLAG_ALLOW_OTHER;
        }
        if self.default_permissions {
            bits |= 1 << ALTFLAG_DEFAULT_PERMISSIONS;
        }
        bits
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_fixed_cstr(&mut buf, &self.mount_path, MAXPATHLEN);
        push_fixed_cstr(&mut buf, &self.volume_name, MAXPATHLEN);
        push_fixed_cstr(&mut buf, self.fs_type, MFSTYPENAMELEN);
        buf.extend_from_slice(&self.altflags().to_ne_bytes());
        buf.extend_from_slice(&self.block_size.to_ne_bytes());
        buf.extend_from_slice(&self.daemon_timeout_secs.to_ne_bytes());
        buf.extend_from_slice(&self.random_cookie.to_ne_bytes());
        buf.extend_from_slice(&(self.rdev as u32).to_ne_bytes());
        buf.extend_from_slice(&self.max_io_size.to_ne_bytes());
        buf
    }
}

/// Writes `s` into a fixed-width, NUL-padded field, truncating if it
/// doesn't fit (always leaving room for the terminating NUL).
fn push_fixed_cstr(buf: &mut Vec<u8>, s: &str, field_len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(field_len - 1);
    buf.extend_from_slice(&bytes[..n]);
    buf.extend(std::iter::repeat(0u8).take(field_len - n));
}

fn device_base(cfg: &BrokerConfig) -> &'static str {
    if cfg.use_dev_edenfs {
        "edenfs"
    } else {
        "osxfuse"
    }
}

fn open_device(cfg: &BrokerConfig) -> Result<(File, u32)> {
    let base = device_base(cfg);
    let mut last_err = None;
    for unit in 0..cfg.device_unit_limit {
        let path = format!("/dev/{base}{unit}");
        match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
        {
            Ok(file) => return Ok((file, unit)),
            Err(err) => match err.raw_os_error() {
                Some(libc::EBUSY) => {
                    last_err = Some(err);
                    continue;
                }
                Some(libc::ENODEV) | Some(libc::ENOENT) => {
                    if !kext_is_loaded(base) {
                        load_kext(base);
                        continue;
                    }
                    last_err = Some(err);
                }
                _ => last_err = Some(err),
            },
        }
    }
    Err(BrokerError::system(
        format!("{base} kext not loaded or all units busy"),
        last_err.unwrap_or_else(|| std::io::Error::from_raw_os_error(libc::ENODEV)),
    ))
}

fn kext_is_loaded(base: &str) -> bool {
    Command::new("kextstat")
        .arg("-b")
        .arg(format!("com.github.{base}"))
        .output()
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}

fn load_kext(base: &str) {
    let Ok(uname) = nix::sys::utsname::uname() else {
        warn!("could not determine kernel version to load {base} kext");
        return;
    };
    let release = uname.release().to_string_lossy().into_owned();
    let major = release.split('.').next().unwrap_or("0");
    let kext_path = format!("/Library/Filesystems/{base}.fs/Contents/Extensions/{major}/{base}.kext");
    match Command::new("kextload").arg(&kext_path).status() {
        Ok(status) if status.success() => info!("loaded {kext_path}"),
        _ => warn!("failed to load {kext_path}; continuing, a fallback device unit may still work"),
    }
}

fn random_cookie(device: &File) -> Result<u32> {
    // Unit-specific device ioctl that returns a mount cookie the kernel
    // will only accept from this fd; the exact request number is kext
    // version-dependent and owned by the vendor headers.
    let mut cookie: u32 = 0;
    let rc = unsafe {
        libc::ioctl(device.as_raw_fd(), FUSE_GET_COOKIE_IOCTL, &mut cookie as *mut u32)
    };
    if rc != 0 {
        return Err(BrokerError::system(
            "fetching osxfuse mount cookie",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(cookie)
}

const FUSE_GET_COOKIE_IOCTL: u64 = 0x4004_4600;

pub fn mount(path: &Path, read_only: bool, _vfs_type: &str, cfg: &BrokerConfig) -> Result<std::os::fd::OwnedFd> {
    let canonical = path
        .canonicalize()
        .map_err(|err| BrokerError::system(format!("resolving {}", path.display()), err))?;
    let canonical_str = canonical.to_string_lossy().into_owned();
    if canonical_str.len() >= 1024 {
        return Err(BrokerError::validation(format!(
            "mount path {canonical_str} is too long for the kernel mount-args buffer"
        )));
    }

    let (device, _unit) = open_device(cfg)?;
    let meta = device
        .metadata()
        .map_err(|err| BrokerError::system("stat on fuse device", err))?;
    let rdev = nix::sys::stat::fstat(device.as_raw_fd())
        .map(|st| st.st_rdev)
        .map_err(|err| BrokerError::system("fstat on fuse device", err.into()))?;
    let _ = meta;

    let args = OsxfuseMountArgs {
        mount_path: canonical_str.clone(),
        rdev,
        random_cookie: random_cookie(&device)?,
        volume_name: canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "eden".to_string()),
        fs_type: "eden",
        block_size: 4096,
        daemon_timeout_secs: cfg.clamped_daemon_timeout_secs(),
        max_io_size: MAX_IO_SIZE,
        allow_other: true,
        default_permissions: true,
    };

    let mount_path_c = CString::new(canonical_str.as_bytes())
        .map_err(|_| BrokerError::validation("mount path contains a NUL byte"))?;

    let mut flags = libc::MNT_NOSUID;
    if read_only {
        flags |= libc::MNT_RDONLY;
    }

    let errno_cell = Arc::new(AtomicI32::new(0));
    let errno_for_thread = Arc::clone(&errno_cell);
    let fs_type_c = CString::new(args.fs_type).unwrap();
    let mount_path_for_thread = mount_path_c;
    let mut args_buf = args.serialize();

    thread::Builder::new()
        .name("osxfuse-mount".into())
        .spawn(move || {
            let rc = unsafe {
                libc::mount(
                    fs_type_c.as_ptr(),
                    mount_path_for_thread.as_ptr(),
                    flags,
                    args_buf.as_mut_ptr() as *mut libc::c_void,
                )
            };
            if rc != 0 {
                errno_for_thread.store(
                    std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO),
                    Ordering::SeqCst,
                );
            }
        })
        .map_err(|err| BrokerError::system("spawning osxfuse mount thread", err))?;

    thread::sleep(MOUNT_PROBE_WAIT);
    let observed = errno_cell.load(Ordering::SeqCst);
    if observed != 0 {
        return Err(BrokerError::system(
            format!("mounting osxfuse filesystem at {}", path.display()),
            std::io::Error::from_raw_os_error(observed),
        ));
    }

    info!("mounted osxfuse filesystem at {}", path.display());
    Ok(device.into())
}
