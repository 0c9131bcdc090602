//! Session lifecycle against the real container engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use oxvfs_core::StorageEngine;
use oxvfs_mount::testing::{
    TEST_PASSWORD, TempContainer, assert_illegal_state, assert_invalid_argument,
};
use oxvfs_mount::{Credential, MountState, VfsError};

#[test]
fn test_create_then_mount_roundtrip() {
    let container = TempContainer::new();
    let vfs = container.session();

    vfs.create_new_container(&Credential::Password("secret")).unwrap();
    assert!(container.path().exists());
    assert!(!vfs.is_mounted());

    vfs.mount(&Credential::Password("secret")).unwrap();
    assert!(vfs.is_mounted());
    assert_eq!(vfs.state(), MountState::Mounted);
    assert_eq!(vfs.live_handle_count(), 1);

    vfs.unmount().unwrap();
    assert!(!vfs.is_mounted());
    assert_eq!(vfs.live_handle_count(), 0);
}

#[test]
fn test_wrong_password_leaves_unmounted() {
    let container = TempContainer::new();
    let vfs = container.session();
    vfs.create_new_container(&Credential::Password("secret")).unwrap();

    let message = assert_invalid_argument(vfs.mount(&Credential::Password("wrong")), "wrong password");
    assert!(message.contains("bad credential"));
    assert_eq!(vfs.state(), MountState::Unmounted);

    vfs.mount(&Credential::Password("secret")).unwrap();
}

#[test]
fn test_key_credential_roundtrip() {
    let container = TempContainer::new();
    let vfs = container.session();
    let key = [0x5au8; 32];

    vfs.create_new_container(&Credential::Key(&key)).unwrap();
    vfs.mount(&Credential::Key(&key)).unwrap();
    vfs.mkdir("/docs", 0o755).unwrap();
    vfs.unmount().unwrap();

    assert!(vfs.mount(&Credential::Key(&[0x5bu8; 32])).is_err());
    assert!(vfs.mount(&Credential::Password("not a key")).is_err());

    vfs.mount(&Credential::Key(&key)).unwrap();
    assert!(vfs.is_directory("/docs").unwrap());
}

#[test]
fn test_short_key_reports_both_lengths() {
    let container = TempContainer::new();
    let vfs = container.session();
    let message = assert_invalid_argument(vfs.mount(&Credential::Key(&[0u8; 12])), "short key");
    assert!(message.contains("32") && message.contains("12"), "{message}");
    assert!(!container.path().exists());
}

#[test]
fn test_mount_requires_existing_container() {
    let container = TempContainer::new();
    let vfs = container.session();
    let message = assert_invalid_argument(
        vfs.mount(&Credential::Password(TEST_PASSWORD)),
        "missing container",
    );
    assert!(message.contains("does not exist"));
}

#[test]
fn test_double_mount_and_double_unmount() {
    let container = TempContainer::new();
    let vfs = container.mounted();

    assert_illegal_state(vfs.mount(&Credential::Password(TEST_PASSWORD)), "second mount");
    assert_eq!(vfs.live_handle_count(), 1);
    assert_illegal_state(
        vfs.create_new_container(&Credential::Password(TEST_PASSWORD)),
        "create while mounted",
    );

    vfs.unmount().unwrap();
    assert_illegal_state(vfs.unmount(), "second unmount");
}

#[test]
fn test_container_path_fixed_while_mounted() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    assert_illegal_state(
        vfs.set_container_path(container.dir().join("other.db")),
        "set path while mounted",
    );
    assert_eq!(vfs.container_path().as_deref(), Some(container.path()));

    vfs.unmount().unwrap();
    vfs.set_container_path(container.dir().join("other.db")).unwrap();
}

#[test]
fn test_invalid_path_leaves_previous_path() {
    let container = TempContainer::new();
    let vfs = container.session();
    assert_invalid_argument(vfs.set_container_path(""), "blank path");
    assert_invalid_argument(
        vfs.set_container_path(container.dir().join("missing/c.db")),
        "missing parent",
    );
    assert_eq!(vfs.container_path().as_deref(), Some(container.path()));
}

#[test]
fn test_unmount_refused_while_worker_thread_alive() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let container = TempContainer::new();
    let vfs = Arc::new(container.mounted());

    let (ready_tx, ready_rx) = mpsc::channel();
    let (finish_tx, finish_rx) = mpsc::channel::<()>();
    let worker = {
        let vfs = Arc::clone(&vfs);
        thread::spawn(move || {
            let handle = vfs
                .open("/worker.txt", OFlag::O_CREAT | OFlag::O_WRONLY, 0o600)
                .unwrap();
            vfs.pwrite(&handle, b"busy", 0).unwrap();
            ready_tx.send(()).unwrap();
            finish_rx.recv().unwrap();
        })
    };

    ready_rx.recv().unwrap();
    assert_eq!(vfs.live_handle_count(), 2);
    let err = vfs.unmount().unwrap_err();
    assert_eq!(err.to_string(), "illegal state: 1 threads still active");
    assert!(vfs.is_mounted());

    finish_tx.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(vfs.live_handle_count(), 1);
    vfs.unmount().unwrap();
}

#[test]
fn test_concurrent_lifecycle_calls_keep_state_consistent() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 20;

    let container = TempContainer::new();
    let vfs = container.session();
    vfs.create_new_container(&Credential::Password(TEST_PASSWORD)).unwrap();
    let vfs = Arc::new(vfs);
    let path = container.path().to_path_buf();
    let mounts = Arc::new(AtomicUsize::new(0));
    let unmounts = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let vfs = Arc::clone(&vfs);
            let path = path.clone();
            let mounts = Arc::clone(&mounts);
            let unmounts = Arc::clone(&unmounts);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let result = match (worker + round) % 3 {
                        0 => vfs
                            .mount(&Credential::Password(TEST_PASSWORD))
                            .map(|()| mounts.fetch_add(1, Ordering::SeqCst)),
                        1 => vfs.unmount().map(|()| unmounts.fetch_add(1, Ordering::SeqCst)),
                        _ => vfs.set_container_path(&path).map(|()| 0),
                    };
                    if let Err(err) = result {
                        assert!(matches!(err, VfsError::IllegalState { .. }), "{err:?}");
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mounted = usize::from(vfs.is_mounted());
    assert_eq!(mounts.load(Ordering::SeqCst) - unmounts.load(Ordering::SeqCst), mounted);
    assert_eq!(vfs.live_handle_count(), mounted);
    assert_eq!(vfs.container_path().as_deref(), Some(container.path()));
    if mounted == 1 {
        vfs.unmount().unwrap();
    }
    assert_eq!(vfs.engine().instance_count(), 0);
}

#[test]
fn test_operations_after_unmount_fail_with_enxio() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    vfs.unmount().unwrap();

    let err = vfs.stat("/").unwrap_err();
    assert!(matches!(err, VfsError::IllegalState { .. }));
    assert_eq!(err.to_errno(), Errno::ENXIO);
}

#[test]
fn test_transactions_through_session() {
    let container = TempContainer::new();
    let vfs = container.mounted();

    vfs.begin_transaction().unwrap();
    vfs.mkdir("/committed", 0o755).unwrap();
    vfs.complete_transaction().unwrap();

    vfs.begin_transaction().unwrap();
    vfs.mkdir("/rolled-back", 0o755).unwrap();
    vfs.rollback_transaction().unwrap();

    assert!(vfs.is_directory("/committed").unwrap());
    assert!(!vfs.is_directory("/rolled-back").unwrap());

    let err = vfs.complete_transaction().unwrap_err();
    assert!(err.is_errno(Errno::EINVAL));
}

#[test]
fn test_data_survives_remount() {
    let container = TempContainer::new();
    let vfs = container.mounted();
    let handle = vfs
        .open("/note", OFlag::O_CREAT | OFlag::O_WRONLY, 0o600)
        .unwrap();
    vfs.pwrite(&handle, b"remember me", 0).unwrap();
    vfs.unmount().unwrap();

    let vfs = container.session();
    vfs.mount(&Credential::Password(TEST_PASSWORD)).unwrap();
    let handle = vfs.open("/note", OFlag::O_RDONLY, 0o600).unwrap();
    let mut buf = [0u8; 32];
    let n = vfs.pread(&handle, &mut buf, 0).unwrap();
    assert_eq!(&buf[..n], b"remember me");
}
