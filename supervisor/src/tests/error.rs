use crate::worker::WorkerError;

use std::panic::Location;

use error_location::ErrorLocation;

fn loc() -> ErrorLocation {
    ErrorLocation::from(Location::caller())
}

#[test]
fn io_conversion_captures_source_message() {
    let err = WorkerError::from(std::io::Error::other("disk on fire"));
    assert!(matches!(err, WorkerError::Io { .. }));
    assert!(err.to_string().contains("disk on fire"));
}

#[test]
fn io_errors_are_not_transient() {
    let err = WorkerError::from(std::io::Error::other("boom"));
    assert!(!err.is_transient());
}

#[test]
fn every_variant_offers_a_recovery_hint() {
    let variants = vec![
        WorkerError::StartupFiles {
            path: "backend/main.py".into(),
            location: loc(),
        },
        WorkerError::Spawn {
            source: std::io::Error::other("refused"),
            location: loc(),
        },
        WorkerError::ConfigInvalid {
            message: "bad port".into(),
            location: loc(),
        },
        WorkerError::LockAcquisition {
            path: "instance.lock".into(),
            source: std::io::Error::other("denied"),
            location: loc(),
        },
        WorkerError::DataDirCreation {
            path: "data".into(),
            source: std::io::Error::other("denied"),
            location: loc(),
        },
        WorkerError::from(std::io::Error::other("io")),
    ];

    for err in variants {
        assert!(!err.recovery_hint().is_empty(), "{err}");
    }
}

#[test]
fn startup_files_hint_points_at_reinstall() {
    let err = WorkerError::StartupFiles {
        path: "backend/main.py".into(),
        location: loc(),
    };
    assert!(err.recovery_hint().contains("reinstall"));
}
