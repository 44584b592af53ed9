//! Periodic cleanup sweep.
//!
//! Runs once at startup and then on a fixed interval. Each sweep walks
//! every tracked deployment and reclaims the ones whose TTL has lapsed or
//! whose PR is no longer open. One broken deployment never aborts the rest
//! of the sweep.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::containers::PreviewDeployer;
use crate::forge::ForgeClient;
use crate::locks::DeploymentLocks;
use crate::proxy::ProxyManager;
use crate::tracker::{Deployment, DeploymentTracker};

pub struct Reconciler {
    tracker: Arc<dyn DeploymentTracker>,
    forge: Arc<dyn ForgeClient>,
    deployer: Arc<dyn PreviewDeployer>,
    proxy: Arc<ProxyManager>,
    locks: Arc<DeploymentLocks>,
    ttl_days: i64,
}

/// What one sweep did, for the log line and for tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub examined: usize,
    pub reclaimed: usize,
    pub errors: usize,
}

impl Reconciler {
    pub fn new(
        tracker: Arc<dyn DeploymentTracker>,
        forge: Arc<dyn ForgeClient>,
        deployer: Arc<dyn PreviewDeployer>,
        proxy: Arc<ProxyManager>,
        locks: Arc<DeploymentLocks>,
        ttl_days: i64,
    ) -> Self {
        Self {
            tracker,
            forge,
            deployer,
            proxy,
            locks,
            ttl_days,
        }
    }

    /// One full pass over the store. Safe to run concurrently with webhook
    /// traffic — every reclamation happens under that deployment's lock.
    pub async fn run_sweep(&self) -> SweepOutcome {
        let deployments = self.tracker.get_all_deployments();
        let mut outcome = SweepOutcome {
            examined: deployments.len(),
            ..Default::default()
        };

        for deployment in deployments {
            let id = deployment.deployment_id.clone();
            match self.should_reclaim(&deployment).await {
                None => {}
                Some(reason) => {
                    info!(deployment_id = %id, reason, "reclaiming stale preview");
                    let _guard = self.locks.acquire(&id).await;
                    match self.reclaim(&deployment).await {
                        Ok(()) => outcome.reclaimed += 1,
                        Err(e) => {
                            warn!(deployment_id = %id, err = %format!("{e:#}"), "reclaim failed — continuing sweep");
                            outcome.errors += 1;
                        }
                    }
                }
            }
        }

        info!(
            examined = outcome.examined,
            reclaimed = outcome.reclaimed,
            errors = outcome.errors,
            "reconciler sweep finished"
        );
        outcome
    }

    /// A reason string when the deployment should go away, `None` to keep it.
    async fn should_reclaim(&self, deployment: &Deployment) -> Option<&'static str> {
        let age_days = self
            .tracker
            .get_deployment_age_days(&deployment.deployment_id)
            .unwrap_or(0);
        if age_days > self.ttl_days {
            return Some("ttl expired");
        }

        match self
            .forge
            .pr_status(
                &deployment.repo_owner,
                &deployment.repo_name,
                deployment.pr_number,
            )
            .await
        {
            Ok(state) if !state.is_open() => Some("pull request no longer open"),
            Ok(_) => None,
            Err(e) => {
                // Can't reach the forge — assume the PR is still open rather
                // than tearing down a live preview on a network blip.
                warn!(
                    deployment_id = %deployment.deployment_id,
                    err = %format!("{e:#}"),
                    "PR status query failed — assuming open"
                );
                None
            }
        }
    }

    /// Same teardown sequence as the webhook's close path.
    async fn reclaim(&self, deployment: &Deployment) -> Result<()> {
        self.deployer
            .cleanup_preview(&deployment.deployment_id)
            .await?;
        self.proxy
            .remove_preview(&deployment.project_slug, deployment.pr_number)
            .await?;
        self.tracker.delete_deployment(&deployment.deployment_id)?;
        Ok(())
    }
}

// ─── Background loop ──────────────────────────────────────────────────────────

pub struct ReconcilerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(err = %e, "reconciler task did not shut down cleanly");
        }
    }
}

/// Start the sweep loop: one immediate pass, then one every
/// `interval_hours`. The returned handle stops it.
pub fn spawn(reconciler: Arc<Reconciler>, interval_hours: u64) -> ReconcilerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(interval_hours, "reconciler started");
        reconciler.run_sweep().await;

        let period = std::time::Duration::from_secs(interval_hours.max(1) * 3600);
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // the immediate tick — sweep already ran

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    reconciler.run_sweep().await;
                }
                _ = stop_rx.changed() => {
                    info!("reconciler stopping");
                    break;
                }
            }
        }
    });

    ReconcilerHandle { stop_tx, task }
}
