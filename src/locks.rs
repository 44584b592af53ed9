//! Per-deployment mutual exclusion.
//!
//! Deploy, update, and cleanup for the same deployment id must never
//! interleave — a re-opened PR racing its own cleanup would otherwise leave
//! half a stack behind. Independent deployments share nothing and proceed in
//! parallel. The webhook handler and the reconciler both acquire through
//! this table, so the two entry points serialize against each other too.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct DeploymentLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for, then hold, the lock for `deployment_id`. The guard keeps
    /// the critical section alive until dropped.
    pub async fn acquire(&self, deployment_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.locks.lock().await;
            table
                .entry(deployment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = Arc::new(DeploymentLocks::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("acme-api-42").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_ids_run_concurrently() {
        let locks = Arc::new(DeploymentLocks::new());
        let a = locks.acquire("acme-api-1").await;
        // A second id must not block behind the first.
        let b = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            locks.acquire("acme-api-2"),
        )
        .await;
        assert!(b.is_ok());
        drop(a);
    }
}
