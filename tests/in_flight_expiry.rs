use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use cname_rollup::{InFlightRegistry, Orchestrator, RollupConfig, checkpoint_entry};

fn setup(root: &Path) -> PathBuf {
    let shard = root.join("in").join("com");
    fs::create_dir_all(&shard).unwrap();
    fs::write(shard.join("a.csv"), "a.com,10\na.com,20\n").unwrap();
    fs::write(shard.join("b.csv"), "b.com,30\n").unwrap();
    shard.join("a.csv")
}

fn config_in(root: &Path, owner: &str) -> RollupConfig {
    RollupConfig::new(root.join("in"), root.join("out"))
        .with_state_dir(root.join("state"))
        .with_lock_timeout(Some(Duration::from_secs(5)))
        .with_owner(owner)
}

#[test]
fn live_claim_from_another_run_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let claimed = setup(root);
    let config = config_in(root, "survivor");
    let other = InFlightRegistry::new(&config.in_flight_dir, config.in_flight_ttl, "other-run");
    let _held = other.claim(&checkpoint_entry(&claimed)).unwrap().unwrap();

    let summary = Orchestrator::new(config).unwrap().run().unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.skipped_in_flight, 1);
    assert_eq!(summary.processed().len(), 1);
    assert!(!root.join("out/com/a.csv").exists());
    assert!(root.join("out/com/b.csv").exists());
}

#[test]
fn claim_left_by_a_crashed_run_expires_and_is_taken_over() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let claimed = setup(root);
    let ttl = Duration::from_millis(200);
    let config = config_in(root, "survivor").with_in_flight_ttl(ttl);

    let crashed = InFlightRegistry::new(&config.in_flight_dir, ttl, "crashed-run");
    let handle = crashed.claim(&checkpoint_entry(&claimed)).unwrap().unwrap();
    // A crash never releases the claim.
    std::mem::forget(handle);
    assert_eq!(crashed.claims().unwrap().len(), 1);

    thread::sleep(ttl * 2);
    let orchestrator = Orchestrator::new(config).unwrap();
    let summary = orchestrator.run().unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.skipped_in_flight, 0);
    assert_eq!(summary.processed().len(), 2);
    assert_eq!(
        fs::read_to_string(root.join("out/com/a.csv")).unwrap(),
        "a.com;10;20\n"
    );
    assert!(orchestrator.in_flight().claims().unwrap().is_empty());
}

#[test]
fn released_claims_leave_no_trace_after_a_run() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    setup(root);
    let orchestrator = Orchestrator::new(config_in(root, "tidy")).unwrap();
    orchestrator.run().unwrap();
    assert!(orchestrator.in_flight().claims().unwrap().is_empty());
    assert!(orchestrator.in_flight().active().unwrap().is_empty());
}
