use crate::worker::WorkerState;

use WorkerState::*;

#[test]
fn full_lifecycle_is_legal() {
    assert!(Stopped.can_transition(Starting));
    assert!(Starting.can_transition(Running));
    assert!(Running.can_transition(Stopping));
    assert!(Stopping.can_transition(Stopped));
}

#[test]
fn crash_path_is_legal() {
    assert!(Running.can_transition(Crashing));
    assert!(Crashing.can_transition(StoppedError));
    assert!(StoppedError.can_transition(Starting));
}

#[test]
fn adoption_skips_starting() {
    // A worker already answering probes at boot is adopted directly.
    assert!(Stopped.can_transition(Running));
    assert!(StoppedError.can_transition(Running));
}

#[test]
fn starting_is_only_legal_from_terminal_states() {
    assert!(Stopped.can_start());
    assert!(StoppedError.can_start());

    for state in [Starting, Running, Stopping, Crashing] {
        assert!(!state.can_start(), "{state:?} must not allow start");
        assert!(!state.can_transition(Starting));
    }
}

#[test]
fn clean_self_exit_is_legal() {
    // A worker exiting with code 0 on its own goes straight to stopped.
    assert!(Running.can_transition(Stopped));
    assert!(Starting.can_transition(Stopped));
}

#[test]
fn no_shortcut_from_stopped_to_stopping() {
    assert!(!Stopped.can_transition(Stopping));
    assert!(!Stopped.can_transition(Crashing));
    assert!(!StoppedError.can_transition(Stopped));
}

#[test]
fn active_states() {
    assert!(Starting.is_active());
    assert!(Running.is_active());
    assert!(Stopping.is_active());
    assert!(!Stopped.is_active());
    assert!(!StoppedError.is_active());
}
