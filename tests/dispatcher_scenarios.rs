//! End-to-end scenarios driving a [`Dispatcher`] over a real socket pair,
//! mirroring spec §8's S1-S6 and its cross-cutting invariants.

mod support;

use std::thread;

use mount_broker::config::BrokerConfig;
use mount_broker::dispatcher::Dispatcher;
use mount_broker::mount::options::UnmountOptions;
use mount_broker::proto::codec::Reader;
use mount_broker::proto::header::RESP_ERROR;
use mount_broker::proto::{MessageKind, PacketHeader};
use tempfile::tempdir;

use support::*;

fn spawn_dispatcher(backend: FakeMountBackend) -> (TestClient, thread::JoinHandle<()>) {
    let (server_io, client_io) = socket_pair();
    let config = BrokerConfig::new(1000, 1000);
    let mut dispatcher = Dispatcher::new(server_io, backend, config);
    let handle = thread::spawn(move || dispatcher.run());
    (TestClient::new(client_io), handle)
}

#[test]
fn s1_mount_fuse_inserts_into_registry_and_returns_one_fd() {
    let dir = tempdir().unwrap();
    let backend = FakeMountBackend::new();
    let (mut client, handle) = spawn_dispatcher(backend.clone());

    let body = mount_fuse_body(dir.path().to_str().unwrap(), false, "fuse");
    client.send(&request_payload(7, MessageKind::MountFuse, &body));
    let (resp, fd_count) = client.recv();
    let (header, _) = PacketHeader::decode(&resp).unwrap();
    assert_eq!(header.transaction_id, 7);
    assert_eq!(header.message_kind, MessageKind::MountFuse.wire());
    assert_eq!(fd_count, 1);
    assert!(backend
        .calls
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.starts_with("fuse_mount")));

    drop(client);
    handle.join().unwrap();
}

#[test]
fn s2_unmount_of_unknown_path_is_a_domain_error_with_no_syscall() {
    let backend = FakeMountBackend::new();
    let (mut client, handle) = spawn_dispatcher(backend.clone());

    let body = unmount_fuse_body("/tmp/other", UnmountOptions::default());
    client.send(&request_payload(8, MessageKind::UnmountFuse, &body));
    let (resp, _) = client.recv();
    let (header, payload) = PacketHeader::decode(&resp).unwrap();
    assert_eq!(header.transaction_id, 8);
    assert_eq!(header.message_kind, RESP_ERROR);
    let mut r = Reader::new(payload);
    let _kind_tag = r.u8().unwrap();
    let message = r.string().unwrap();
    assert!(message.contains("/tmp/other"));
    assert!(backend.calls.lock().unwrap().iter().all(|c| !c.starts_with("unmount")));

    drop(client);
    handle.join().unwrap();
}

#[test]
fn s3_bind_mount_under_an_owned_mount_succeeds() {
    let dir = tempdir().unwrap();
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    let src = tempdir().unwrap();

    let backend = FakeMountBackend::new();
    let (mut client, handle) = spawn_dispatcher(backend.clone());

    let mount_body = mount_fuse_body(dir.path().to_str().unwrap(), false, "fuse");
    client.send(&request_payload(1, MessageKind::MountFuse, &mount_body));
    let _ = client.recv();

    let bind_body = mount_bind_body(src.path().to_str().unwrap(), sub.to_str().unwrap());
    client.send(&request_payload(9, MessageKind::MountBind, &bind_body));
    let (resp, _) = client.recv();
    let (header, _) = PacketHeader::decode(&resp).unwrap();
    assert_eq!(header.transaction_id, 9);
    assert_eq!(header.message_kind, MessageKind::MountBind.wire());

    drop(client);
    handle.join().unwrap();
}

#[test]
fn s4_bind_mount_outside_any_owned_mount_is_rejected_with_no_syscall() {
    let backend = FakeMountBackend::new();
    let (mut client, handle) = spawn_dispatcher(backend.clone());

    let body = mount_bind_body("/src", "/etc/shadow");
    client.send(&request_payload(10, MessageKind::MountBind, &body));
    let (resp, _) = client.recv();
    let (header, _) = PacketHeader::decode(&resp).unwrap();
    assert_eq!(header.transaction_id, 10);
    assert_eq!(header.message_kind, RESP_ERROR);
    assert!(backend.calls.lock().unwrap().iter().all(|c| !c.starts_with("bind_mount")));

    drop(client);
    handle.join().unwrap();
}

#[test]
fn s5_peer_disconnect_unmounts_every_registered_mount() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let backend = FakeMountBackend::new();
    let (mut client, handle) = spawn_dispatcher(backend.clone());

    for (txid, dir) in [(1u32, &dir_a), (2, &dir_b)] {
        let body = mount_fuse_body(dir.path().to_str().unwrap(), false, "fuse");
        client.send(&request_payload(txid, MessageKind::MountFuse, &body));
        let _ = client.recv();
    }

    drop(client);
    handle.join().unwrap();

    let calls = backend.calls.lock().unwrap();
    let unmount_count = calls.iter().filter(|c| c.starts_with("unmount")).count();
    assert_eq!(unmount_count, 2);
}

#[test]
fn s6_get_pid_returns_four_big_endian_bytes() {
    let backend = FakeMountBackend::new();
    let (mut client, handle) = spawn_dispatcher(backend);

    client.send(&request_payload(1, MessageKind::GetPid, &[]));
    let (resp, _) = client.recv();
    let (header, payload) = PacketHeader::decode(&resp).unwrap();
    assert_eq!(header.transaction_id, 1);
    assert_eq!(payload.len(), 4);
    let mut r = Reader::new(payload);
    assert_eq!(r.u32().unwrap(), std::process::id());

    drop(client);
    handle.join().unwrap();
}
