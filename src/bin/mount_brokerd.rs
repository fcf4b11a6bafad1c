//! `mount-brokerd`: the privileged mount broker's process entry point.
//!
//! Receives its handoff from a launcher that has already forked the
//! privileged process and connected a socket pair: an inherited, connected
//! socket fd plus the unprivileged client's uid/gid (spec §6). Everything
//! else - state machine, protocol, mount procedures - lives in the
//! `mount_broker` library.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use clap::Parser;
use log::{error, info};

use mount_broker::config::BrokerConfig;
use mount_broker::dispatcher::Dispatcher;
use mount_broker::mount::real_backend;
use mount_broker::proto::FrameIo;

#[derive(Parser, Debug)]
#[command(name = "mount-brokerd", about = "Privileged mount broker")]
struct Args {
    /// Inherited, already-connected socket descriptor number.
    #[arg(long)]
    fd: RawFd,

    /// uid of the unprivileged client daemon.
    #[arg(long)]
    uid: u32,

    /// gid of the unprivileged client daemon.
    #[arg(long)]
    gid: u32,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    if let Err(err) = std::env::set_current_dir("/") {
        error!("failed to chdir to /: {err}");
        std::process::exit(1);
    }

    // Safety: the launcher guarantees `fd` is a valid, connected socket
    // handed off for our exclusive use.
    let owned_fd = unsafe { OwnedFd::from_raw_fd(args.fd) };
    if let Err(err) = mount_broker::dispatcher::validate_inherited_fd(&owned_fd) {
        error!("inherited fd {} is not usable as a socket: {err}", args.fd);
        std::process::exit(1);
    }
    let socket = UnixStream::from(owned_fd);

    if let Err(err) = mount_broker::dispatcher::ignore_interactive_signals() {
        error!("failed to install signal handlers: {err}");
        std::process::exit(1);
    }

    let io = FrameIo::new(socket);
    let config = BrokerConfig::new(args.uid, args.gid);
    let backend = real_backend();
    let mut dispatcher = Dispatcher::new(io, backend, config);

    info!("mount broker started, pid {}", std::process::id());
    dispatcher.run();
    info!("mount broker exiting");
}
