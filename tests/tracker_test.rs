//! Port allocator behavior across realistic allocate/release interleavings.

use std::collections::HashSet;
use std::sync::Arc;

use previewd::tracker::{DeploymentTracker, FileTracker};

fn tracker() -> (tempfile::TempDir, Arc<FileTracker>) {
    let dir = tempfile::tempdir().unwrap();
    let t = Arc::new(FileTracker::open(dir.path().join("deployments.json")).unwrap());
    (dir, t)
}

#[test]
fn seeded_store_skips_to_next_free_pair() {
    let (_dir, t) = tracker();
    t.allocate_ports("a-1", &HashSet::new()).unwrap();
    t.allocate_ports("b-2", &HashSet::new()).unwrap();

    let c = t.allocate_ports("c-3", &HashSet::new()).unwrap();
    assert_eq!(c.exposed_app_port, 8002);
    assert_eq!(c.exposed_db_port, 9002);
}

#[test]
fn live_allocations_never_collide() {
    let (_dir, t) = tracker();

    // Allocate 20, release every third, allocate 10 more; live ports must
    // stay pairwise distinct throughout.
    for i in 0..20 {
        t.allocate_ports(&format!("repo-{i}"), &HashSet::new()).unwrap();
    }
    for i in (0..20).step_by(3) {
        t.release_ports(&format!("repo-{i}")).unwrap();
    }
    for i in 20..30 {
        t.allocate_ports(&format!("repo-{i}"), &HashSet::new()).unwrap();
    }

    let mut app_ports = HashSet::new();
    let mut db_ports = HashSet::new();
    for i in 0..30 {
        let id = format!("repo-{i}");
        // Idempotent read-back of whatever is currently allocated.
        if i % 3 == 0 && i < 20 {
            continue;
        }
        let a = t.allocate_ports(&id, &HashSet::new()).unwrap();
        assert!(app_ports.insert(a.exposed_app_port), "dup app port {}", a.exposed_app_port);
        assert!(db_ports.insert(a.exposed_db_port), "dup db port {}", a.exposed_db_port);
        assert!(a.exposed_app_port >= 8000);
        assert!(a.exposed_db_port >= 9000);
    }
}

#[test]
fn engine_busy_ports_are_avoided() {
    let (_dir, t) = tracker();
    // Ports bound by containers the tracker has no record of.
    let busy: HashSet<u16> = [8000, 8002, 9001].into_iter().collect();

    let a = t.allocate_ports("a-1", &busy).unwrap();
    assert_eq!(a.exposed_app_port, 8001);
    assert_eq!(a.exposed_db_port, 9000);

    let b = t.allocate_ports("b-2", &busy).unwrap();
    assert_eq!(b.exposed_app_port, 8003);
    assert_eq!(b.exposed_db_port, 9002);
}

#[test]
fn concurrent_allocations_stay_distinct() {
    let (_dir, t) = tracker();

    let mut handles = Vec::new();
    for i in 0..16 {
        let t = t.clone();
        handles.push(std::thread::spawn(move || {
            t.allocate_ports(&format!("repo-{i}"), &HashSet::new()).unwrap()
        }));
    }

    let mut app_ports = HashSet::new();
    let mut db_ports = HashSet::new();
    for handle in handles {
        let allocation = handle.join().unwrap();
        assert!(app_ports.insert(allocation.exposed_app_port));
        assert!(db_ports.insert(allocation.exposed_db_port));
    }
}

#[test]
fn allocation_is_stable_for_the_same_id() {
    let (_dir, t) = tracker();
    let first = t.allocate_ports("acme-api-42", &HashSet::new()).unwrap();
    for _ in 0..5 {
        let again = t.allocate_ports("acme-api-42", &HashSet::new()).unwrap();
        assert_eq!(again, first);
    }
}
