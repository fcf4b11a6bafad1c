//! Broker-owned configuration.
//!
//! Mutated only by the dispatcher thread in response to `SET_DAEMON_TIMEOUT`
//! and `SET_USE_EDENFS` requests; never shared across threads, matching the
//! single-threaded ownership model described for the mount registry.

use std::time::Duration;

/// Default FUSE daemon timeout, matching the upstream default of 60s.
pub const DEFAULT_FUSE_TIMEOUT: Duration = Duration::from_secs(60);

/// The kernel-imposed ceiling on the osxfuse daemon timeout field.
pub const OSXFUSE_MAX_DAEMON_TIMEOUT_SECS: u32 = 600;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// uid of the unprivileged client, supplied by the launcher.
    pub uid: u32,
    /// gid of the unprivileged client, supplied by the launcher.
    pub gid: u32,
    /// Daemon timeout applied to subsequent FUSE mounts.
    pub fuse_timeout: Duration,
    /// Prefer `/dev/edenfs*` over `/dev/osxfuse*` on macOS.
    pub use_dev_edenfs: bool,
    /// Upper bound on the osxfuse device-unit probing loop.
    pub device_unit_limit: u32,
}

impl BrokerConfig {
    pub fn new(uid: u32, gid: u32) -> Self {
        BrokerConfig {
            uid,
            gid,
            fuse_timeout: DEFAULT_FUSE_TIMEOUT,
            use_dev_edenfs: false,
            device_unit_limit: 32,
        }
    }

    /// Daemon timeout clamped to what the osxfuse mount-args struct can hold.
    pub fn clamped_daemon_timeout_secs(&self) -> u32 {
        let secs = self.fuse_timeout.as_secs().min(u64::from(u32::MAX)) as u32;
        secs.min(OSXFUSE_MAX_DAEMON_TIMEOUT_SECS)
    }
}
