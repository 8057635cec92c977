//! Single-instance guard behavior.

use feedvox_supervisor::worker::{InstanceGuard, LockResult};

#[test]
fn second_acquire_reports_holder_pid() {
    let dir = tempfile::tempdir().unwrap();

    let first = InstanceGuard::acquire(dir.path()).unwrap();
    let LockResult::Acquired(_guard) = first else {
        panic!("first acquire must succeed");
    };

    // Same file, second descriptor: the OS lock refuses it.
    let second = InstanceGuard::acquire(dir.path()).unwrap();
    let LockResult::AlreadyHeld { holder_pid } = second else {
        panic!("second acquire must be refused");
    };
    assert_eq!(holder_pid, Some(std::process::id()));
}

#[test]
fn lock_is_reacquirable_after_release() {
    let dir = tempfile::tempdir().unwrap();

    let first = InstanceGuard::acquire(dir.path()).unwrap();
    let LockResult::Acquired(guard) = first else {
        panic!("first acquire must succeed");
    };
    drop(guard);

    // The file persists; only the kernel lock is released. Unlinking it
    // would let two waiters lock different inodes under the same path.
    assert!(
        dir.path().join("instance.lock").exists(),
        "release keeps the lock file for reuse"
    );

    let again = InstanceGuard::acquire(dir.path()).unwrap();
    assert!(matches!(again, LockResult::Acquired(_)));
}

#[test]
fn explicit_release_matches_drop() {
    let dir = tempfile::tempdir().unwrap();

    let LockResult::Acquired(mut guard) = InstanceGuard::acquire(dir.path()).unwrap() else {
        panic!("first acquire must succeed");
    };
    guard.release();

    assert!(matches!(
        InstanceGuard::acquire(dir.path()).unwrap(),
        LockResult::Acquired(_)
    ));
}

#[test]
fn contention_does_not_destroy_holder_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("instance.lock");

    let LockResult::Acquired(_guard) = InstanceGuard::acquire(dir.path()).unwrap() else {
        panic!("first acquire must succeed");
    };
    let before = std::fs::read_to_string(&lock_path).unwrap();

    let _ = InstanceGuard::acquire(dir.path()).unwrap();

    let after = std::fs::read_to_string(&lock_path).unwrap();
    assert_eq!(before, after);
}
