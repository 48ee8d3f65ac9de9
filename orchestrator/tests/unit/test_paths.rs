//! Remote path resolution and progress band tests

use std::collections::BTreeMap;

use deploymaster::deploy::paths::{master_path, push_target, resolve_slave_path};
use deploymaster::deploy::progress::{band, ProgressTracker, MAX_UNFINISHED};
use deploymaster::models::task::{TaskDefinition, TaskStatus};

const DEFAULT: &str = "/tmp/deploymaster";

fn task() -> TaskDefinition {
    let mut per_slave = BTreeMap::new();
    per_slave.insert("s1".to_string(), "/srv/s1-app/".to_string());
    per_slave.insert("s3".to_string(), "  ".to_string());
    TaskDefinition {
        remote_path: "/opt/app".to_string(),
        slave_remote_path: "/srv/app".to_string(),
        slave_remote_paths: per_slave,
        ..Default::default()
    }
}

#[test]
fn test_slave_path_precedence() {
    let task = task();
    assert_eq!(resolve_slave_path(&task, "s1", DEFAULT), "/srv/s1-app");
    // blank per-slave entry falls through to the uniform path
    assert_eq!(resolve_slave_path(&task, "s3", DEFAULT), "/srv/app");
    assert_eq!(resolve_slave_path(&task, "s9", DEFAULT), "/srv/app");

    let task = TaskDefinition {
        slave_remote_path: String::new(),
        ..task
    };
    assert_eq!(resolve_slave_path(&task, "s9", DEFAULT), "/opt/app");
    assert_eq!(master_path(&task, DEFAULT), "/opt/app");
}

#[test]
fn test_blank_paths_use_default() {
    let task = TaskDefinition::default();
    assert_eq!(master_path(&task, DEFAULT), DEFAULT);
    assert_eq!(resolve_slave_path(&task, "s1", DEFAULT), DEFAULT);
    assert_eq!(push_target(&master_path(&task, DEFAULT), Some("app.war")), "/tmp/deploymaster/app.war");
}

#[test]
fn test_phase_bands_are_ordered() {
    let phases = [
        TaskStatus::Downloading,
        TaskStatus::Uploading,
        TaskStatus::Syncing,
        TaskStatus::Executing,
    ];
    for pair in phases.windows(2) {
        assert!(band(pair[0]).1 <= band(pair[1]).0);
    }
    assert!(band(TaskStatus::Executing).1 <= MAX_UNFINISHED);
}

#[test]
fn test_tracker_caps_unfinished_runs() {
    let mut tracker = ProgressTracker::default();
    assert_eq!(tracker.advance(40), Some(40));
    assert_eq!(tracker.advance(30), None);
    assert_eq!(tracker.advance(100), Some(MAX_UNFINISHED));
    assert_eq!(tracker.value(), MAX_UNFINISHED);
    assert_eq!(tracker.complete(), 100);
}
