//! Architectural Contract Test: Ownership Survives Restarts
//!
//! This test verifies that ownership written by one process is honoured by
//! the next one reading the same state file.
//!
//! Constraints verified:
//! - Owned domains are deleted after a restart when their route is gone
//! - Foreign records stay untouched after a restart
//! - A corrupt state file starts empty instead of failing the cycle
//! - A state file that cannot be written does not abort the cycle
//!
//! If this test fails, a restart can leak records or delete foreign ones.

mod common;

use common::*;
use routedns_core::{FileStateStore, Reconciler, StateStore};

fn reconciler_with_file(h: &Harness, path: &std::path::Path) -> Reconciler {
    Reconciler::new(
        Box::new(h.dns.clone()),
        Box::new(h.proxy.clone()),
        Box::new(FileStateStore::new(path)),
    )
}

#[tokio::test]
async fn ownership_is_honoured_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");

    let h = Harness::new(vec![instance("p1", "10.0.0.1")])
        .with_dns(MockDnsProvider::with_records(&[("manual.example.com", "192.168.1.9")]));
    h.proxy.set_routes("p1", vec![route("a.example.com")]);

    // First process
    reconciler_with_file(&h, &state_path)
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(h.dns.calls(), vec!["add a.example.com 10.0.0.1"]);

    // Second process: fresh store, same file
    h.dns.clear_calls();
    h.proxy.set_routes("p1", vec![]);
    let report = reconciler_with_file(&h, &state_path)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(h.dns.calls(), vec!["delete a.example.com 10.0.0.1"]);
    assert_eq!(h.dns.records(), vec![("manual.example.com".to_string(), "192.168.1.9".to_string())]);
    assert!(report.state.domains.is_empty());

    let persisted = FileStateStore::new(&state_path).load().await;
    assert_eq!(persisted, report.state);
}

#[tokio::test]
async fn corrupt_state_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::write(&state_path, "{ not json").unwrap();

    let h = Harness::new(vec![instance("p1", "10.0.0.1")]);
    h.proxy.set_routes("p1", vec![route("a.example.com")]);

    let report = reconciler_with_file(&h, &state_path)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.state.owner_of("a.example.com"), Some("p1"));
    let persisted = FileStateStore::new(&state_path).load().await;
    assert_eq!(persisted.owner_of("a.example.com"), Some("p1"));
}

#[tokio::test]
async fn unwritable_state_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // The parent "directory" is a regular file, so saving must fail
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let state_path = blocker.join("state.json");

    let h = Harness::new(vec![instance("p1", "10.0.0.1")]);
    h.proxy.set_routes("p1", vec![route("a.example.com")]);

    let report = reconciler_with_file(&h, &state_path)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert!(!report.is_clean());
}
