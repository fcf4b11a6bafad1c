//! Privileged mount broker library.
//!
//! A small, long-lived, elevated-privilege process that performs FUSE/NFS/
//! bind mount operations on behalf of an unprivileged client daemon over a
//! local stream socket with out-of-band file descriptor passing. See
//! [`dispatcher`] for the event loop and [`mount`] for the platform mount
//! backends.

#![warn(rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fam;
pub mod mount;
pub mod nfs_options;
pub mod proto;
pub mod registry;

pub use config::BrokerConfig;
pub use dispatcher::Dispatcher;
pub use error::{BrokerError, Result};
pub use registry::MountRegistry;
