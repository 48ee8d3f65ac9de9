//! Run FSM unit tests

use deploymaster::deploy::fsm::{PhaseEvent, RunFsm};
use deploymaster::models::task::TaskStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = RunFsm::new();
    assert_eq!(fsm.state(), TaskStatus::Idle);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_cancelled());
}

#[test]
fn test_fsm_full_flow_with_slaves() {
    let mut fsm = RunFsm::new();

    fsm.process(PhaseEvent::Start).unwrap();
    assert_eq!(fsm.state(), TaskStatus::Downloading);

    fsm.process(PhaseEvent::Downloaded).unwrap();
    assert_eq!(fsm.state(), TaskStatus::Uploading);

    fsm.process(PhaseEvent::Uploaded { has_slaves: true }).unwrap();
    assert_eq!(fsm.state(), TaskStatus::Syncing);

    fsm.process(PhaseEvent::Synced).unwrap();
    assert_eq!(fsm.state(), TaskStatus::Executing);

    fsm.process(PhaseEvent::Completed).unwrap();
    assert_eq!(fsm.state(), TaskStatus::Success);
    assert!(fsm.is_terminal());
}

#[test]
fn test_fsm_failure_from_any_phase() {
    for steps in 0..4 {
        let mut fsm = RunFsm::new();
        let path = [
            PhaseEvent::Start,
            PhaseEvent::Downloaded,
            PhaseEvent::Uploaded { has_slaves: true },
            PhaseEvent::Synced,
        ];
        for event in path.iter().take(steps) {
            fsm.process(event.clone()).unwrap();
        }
        fsm.process(PhaseEvent::Fail("connection refused".to_string()))
            .unwrap();
        assert_eq!(fsm.state(), TaskStatus::Failed);
        assert_eq!(fsm.error(), Some("connection refused"));
    }
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = RunFsm::new();
    fsm.process(PhaseEvent::Start).unwrap();
    fsm.process(PhaseEvent::Fail("svn: E170013".to_string())).unwrap();

    assert!(fsm.process(PhaseEvent::Downloaded).is_err());
    assert!(fsm.process(PhaseEvent::Fail("again".to_string())).is_err());
    assert!(fsm.process(PhaseEvent::Cancel).is_err());
    assert_eq!(fsm.error(), Some("svn: E170013"));
}

#[test]
fn test_fsm_cancel() {
    let mut fsm = RunFsm::new();
    fsm.process(PhaseEvent::Start).unwrap();
    fsm.process(PhaseEvent::Downloaded).unwrap();
    fsm.process(PhaseEvent::Cancel).unwrap();

    assert_eq!(fsm.state(), TaskStatus::Failed);
    assert!(fsm.is_cancelled());
    assert!(fsm.process(PhaseEvent::Uploaded { has_slaves: false }).is_err());
}

#[test]
fn test_fsm_rejects_skipped_phase() {
    let mut fsm = RunFsm::new();
    assert!(fsm.process(PhaseEvent::Downloaded).is_err());
    assert_eq!(fsm.state(), TaskStatus::Idle);

    fsm.process(PhaseEvent::Start).unwrap();
    assert!(fsm.process(PhaseEvent::Synced).is_err());
    assert_eq!(fsm.state(), TaskStatus::Downloading);
}
