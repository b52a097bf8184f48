//! Behavioural tests for classifying the previous run.

use std::cell::RefCell;
use std::fs;

use camino::Utf8Path;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use uuid::Uuid;
use vigil_config::StatusPaths;

use crate::{CrashVerdict, DaemonStatus, ExitReason, SessionFacts, StatusStore, StatusTracker};

#[fixture]
fn world() -> RefCell<CrashWorld> {
    RefCell::new(CrashWorld::new())
}

#[given("a fresh state directory")]
fn given_fresh_state(world: &RefCell<CrashWorld>) {
    let _ = world;
}

#[given("a torn status file")]
fn given_torn_status_file(world: &RefCell<CrashWorld>) {
    let world = world.borrow();
    fs::write(world.store.status_path(), b"{\"status\": \"runn").expect("write torn file");
}

#[when("a daemon runs to completion")]
fn when_daemon_runs_to_completion(world: &RefCell<CrashWorld>) {
    let mut world = world.borrow_mut();
    let tracker = world.tracker();
    tracker.update_status(DaemonStatus::Initializing);
    tracker.update_status(DaemonStatus::Running);
    tracker.exit_reason_save(ExitReason::SIGNAL_TERM);
    tracker.update_status(DaemonStatus::Exiting);
    tracker.update_status(DaemonStatus::Exited);
}

#[when("a daemon reaches the running state")]
fn when_daemon_running(world: &RefCell<CrashWorld>) {
    let mut world = world.borrow_mut();
    let tracker = world.tracker();
    tracker.update_status(DaemonStatus::Initializing);
    tracker.update_status(DaemonStatus::Running);
}

#[when("the daemon begins shutting down at step \"{step}\"")]
fn when_daemon_shutting_down(world: &RefCell<CrashWorld>, step: String) {
    let mut world = world.borrow_mut();
    let tracker = world.tracker();
    tracker.exit_reason_save(ExitReason::SIGNAL_TERM);
    tracker.update_status(DaemonStatus::Exiting);
    tracker.shutdown_step(&step);
}

#[when("the daemon receives a deadly \"{reason}\"")]
fn when_deadly_signal(world: &RefCell<CrashWorld>, reason: String) {
    let reason = ExitReason::from_persisted_name(&reason).expect("known exit reason");
    let mut world = world.borrow_mut();
    world.tracker().fatal_capture().capture(reason);
    world.current = None;
}

#[when("the daemon disappears")]
fn when_daemon_disappears(world: &RefCell<CrashWorld>) {
    world.borrow_mut().current = None;
}

#[when("the host reboots")]
fn when_host_reboots(world: &RefCell<CrashWorld>) {
    world.borrow_mut().boot_id = Uuid::new_v4();
}

#[when("the daemon starts again")]
fn when_daemon_starts_again(world: &RefCell<CrashWorld>) {
    let mut world = world.borrow_mut();
    let tracker = world.start();
    world.verdict = Some(tracker.check_crash());
    world.current = Some(tracker);
}

#[then("the previous run is classified as \"{label}\"")]
fn then_classified_as(world: &RefCell<CrashWorld>, label: String) {
    let verdict = world.borrow().verdict.expect("daemon was restarted");
    assert_eq!(verdict.label(), label);
}

#[then("a crash is reported")]
fn then_crash_reported(world: &RefCell<CrashWorld>) {
    let world = world.borrow();
    let tracker = world.current.as_ref().expect("daemon is running");
    assert!(tracker.has_last_crashed());
}

#[then("no crash is reported")]
fn then_no_crash_reported(world: &RefCell<CrashWorld>) {
    let world = world.borrow();
    let tracker = world.current.as_ref().expect("daemon is running");
    assert!(!tracker.has_last_crashed());
    assert!(!tracker.was_incomplete_shutdown());
}

#[then("the last shutdown step was \"{step}\"")]
fn then_last_shutdown_step(world: &RefCell<CrashWorld>, step: String) {
    let world = world.borrow();
    let tracker = world.current.as_ref().expect("daemon is running");
    assert_eq!(tracker.prior().steps.shutdown.as_str(), step);
}

#[then("the recorded fault is a duplicate")]
fn then_fault_is_duplicate(world: &RefCell<CrashWorld>) {
    let verdict = world.borrow().verdict.expect("daemon was restarted");
    assert!(
        matches!(verdict, CrashVerdict::Crashed { duplicate: true, .. }),
        "unexpected verdict {verdict:?}"
    );
}

struct CrashWorld {
    _dir: TempDir,
    store: StatusStore,
    boot_id: Uuid,
    current: Option<StatusTracker>,
    verdict: Option<CrashVerdict>,
}

impl CrashWorld {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");
        let store = StatusStore::new(StatusPaths::in_directory(path).expect("status paths"));
        Self {
            _dir: dir,
            store,
            boot_id: Uuid::new_v4(),
            current: None,
            verdict: None,
        }
    }

    fn start(&self) -> StatusTracker {
        StatusTracker::start(
            self.store.clone(),
            SessionFacts {
                version: "test".into(),
                boot_id: self.boot_id,
                ..SessionFacts::default()
            },
        )
    }

    fn tracker(&mut self) -> &StatusTracker {
        if self.current.is_none() {
            self.current = Some(self.start());
        }
        self.current.as_ref().expect("tracker was just started")
    }
}

#[scenario(
    path = "tests/features/crash_detection.feature",
    name = "A clean run is not reported as a crash"
)]
fn clean_run(world: RefCell<CrashWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/crash_detection.feature",
    name = "A run that stops while running is a crash"
)]
fn crash_while_running(world: RefCell<CrashWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/crash_detection.feature",
    name = "A run killed mid-shutdown is an incomplete shutdown"
)]
fn incomplete_shutdown(world: RefCell<CrashWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/crash_detection.feature",
    name = "A crash from an earlier boot is not judged"
)]
fn crash_from_earlier_boot(world: RefCell<CrashWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/crash_detection.feature",
    name = "A recurring signal crash is flagged as a duplicate"
)]
fn recurring_signal_crash(world: RefCell<CrashWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/crash_detection.feature",
    name = "A corrupt status file counts as a first run"
)]
fn corrupt_status_file(world: RefCell<CrashWorld>) {
    let _ = world;
}
