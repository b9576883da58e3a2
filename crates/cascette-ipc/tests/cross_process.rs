#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Properties that need a second process.
//!
//! The test binary re-executes itself to run `child_entry`, which picks
//! its job from `CASCETTE_IPC_CHILD` and exits without cleaning up.

use cascette_ipc::{
    AcquireMode, IpcFlags, IpcLock, ResourceKey, SemLock, ShmCommand, ShmManager, derive_key,
};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

const CHILD_ENV: &str = "CASCETTE_IPC_CHILD";
const KEY_ENV: &str = "CASCETTE_IPC_KEY";
const PAYLOAD: &[u8] = b"test data";

fn key_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    std::fs::write(&path, b"").expect("write");
    (dir, path)
}

fn run_child(role: &str, key: ResourceKey) -> ExitStatus {
    Command::new(std::env::current_exe().expect("test binary"))
        .args(["child_entry", "--exact", "--ignored", "--nocapture"])
        .env(CHILD_ENV, role)
        .env(KEY_ENV, key.raw().to_string())
        .status()
        .expect("spawn child")
}

#[test]
#[ignore = "runs only inside a child process spawned by this file"]
fn child_entry() {
    let Ok(role) = std::env::var(CHILD_ENV) else {
        return;
    };
    let key = ResourceKey::from_raw(
        std::env::var(KEY_ENV)
            .expect("key variable")
            .parse()
            .expect("numeric key"),
    );

    match role.as_str() {
        "read-shm" => {
            let shm = ShmManager::new();
            let id = shm.get(key, 0, IpcFlags::NONE).expect("lookup");
            let addr = shm.attach(id, IpcFlags::SHM_READ_ONLY).expect("attach");
            assert_eq!(shm.read(&addr).expect("read"), PAYLOAD);
            shm.detach(addr).expect("detach");
        }
        "hold-write" => {
            let lock = SemLock::new(key).expect("attach");
            lock.acquire_exclusive(AcquireMode::Blocking).expect("write");
            assert_eq!(lock.values().expect("values").writers, 1);
            // Exit while holding the gate; SEM_UNDO must give it back.
            std::process::exit(0);
        }
        other => panic!("unknown child role {other}"),
    }
}

#[test]
fn shared_memory_is_visible_to_another_process() {
    let (_dir, path) = key_path("mailbox");
    let key = derive_key(&path, 5).expect("key");

    let shm = ShmManager::new();
    let id = shm
        .get(key, 32, IpcFlags::CREATE | IpcFlags::READ_WRITE)
        .expect("create");
    let addr = shm.attach(id, IpcFlags::NONE).expect("attach");
    shm.write(&addr, PAYLOAD).expect("write");
    shm.detach(addr).expect("detach");

    let status = run_child("read-shm", key);

    shm.control(id, ShmCommand::Remove).expect("remove");
    assert!(status.success(), "reader process failed: {status}");
}

#[test]
fn crashed_writer_is_undone_by_the_kernel() {
    let (_dir, path) = key_path("undo");
    let key = derive_key(&path, 6).expect("key");
    let lock = SemLock::new(key).expect("create");

    let status = run_child("hold-write", key);
    assert!(status.success(), "writer process failed: {status}");

    assert_eq!(lock.values().expect("values").writers, 0);
    lock.acquire_exclusive(AcquireMode::NonBlocking)
        .expect("gate released by undo");
    assert!(!lock.is_degraded());
    lock.release_exclusive();
    lock.close();
}
