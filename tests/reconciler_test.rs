//! Reconciler sweep tests.
//!
//! Seeds the tracker directly, scripts PR states on the forge double, and
//! checks what one sweep reclaims.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use previewd::containers::{DeployOutcome, PreviewDeployer, PreviewRequest};
use previewd::forge::{ForgeClient, PrState};
use previewd::locks::DeploymentLocks;
use previewd::proxy::{ProxyManager, ProxyReload};
use previewd::reconciler::Reconciler;
use previewd::repo_config::{DbType, Framework};
use previewd::tracker::{
    Deployment, DeploymentStatus, DeploymentTracker, FileTracker,
};
use tempfile::TempDir;

struct NoopReload;

#[async_trait]
impl ProxyReload for NoopReload {
    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDeployer {
    cleanups: Mutex<Vec<String>>,
}

#[async_trait]
impl PreviewDeployer for RecordingDeployer {
    async fn deploy_preview(&self, _req: &PreviewRequest) -> Result<DeployOutcome> {
        unreachable!("reconciler never deploys")
    }
    async fn update_preview(&self, _id: &str, _sha: &str) -> Result<DeployOutcome> {
        unreachable!("reconciler never updates")
    }
    async fn cleanup_preview(&self, deployment_id: &str) -> Result<()> {
        self.cleanups.lock().unwrap().push(deployment_id.to_string());
        Ok(())
    }
    async fn get_preview_status(&self, _id: &str) -> Result<DeploymentStatus> {
        Ok(DeploymentStatus::Running)
    }
}

/// PR states keyed by number; unknown PRs error to exercise the
/// assume-open path.
#[derive(Default)]
struct ScriptedForge {
    states: HashMap<u64, PrState>,
}

#[async_trait]
impl ForgeClient for ScriptedForge {
    async fn post_comment(&self, _o: &str, _r: &str, _pr: u64, _b: &str) -> Result<u64> {
        Ok(1)
    }
    async fn update_comment(&self, _o: &str, _r: &str, _id: u64, _b: &str) -> Result<()> {
        Ok(())
    }
    async fn pr_status(&self, _o: &str, _r: &str, pr: u64) -> Result<PrState> {
        self.states
            .get(&pr)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("forge timeout looking up pr {pr}"))
    }
}

struct Harness {
    _dir: TempDir,
    nginx_dir: PathBuf,
    tracker: Arc<FileTracker>,
    deployer: Arc<RecordingDeployer>,
    reconciler: Reconciler,
}

fn harness(states: HashMap<u64, PrState>, ttl_days: i64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let nginx_dir = dir.path().join("nginx");
    std::fs::create_dir_all(&nginx_dir).unwrap();

    let tracker = Arc::new(FileTracker::open(dir.path().join("deployments.json")).unwrap());
    let deployer = Arc::new(RecordingDeployer::default());
    let proxy = Arc::new(ProxyManager::new(&nginx_dir, Arc::new(NoopReload)));
    let reconciler = Reconciler::new(
        tracker.clone(),
        Arc::new(ScriptedForge { states }),
        deployer.clone(),
        proxy,
        Arc::new(DeploymentLocks::new()),
        ttl_days,
    );

    Harness {
        _dir: dir,
        nginx_dir,
        tracker,
        deployer,
        reconciler,
    }
}

fn seed(h: &Harness, pr: u64, age_days: i64) {
    let created = Utc::now() - Duration::days(age_days);
    let id = format!("acme-api-{pr}");
    h.tracker
        .save_deployment(Deployment {
            pr_number: pr,
            repo_owner: "acme".into(),
            repo_name: "api".into(),
            project_slug: "acme-api".into(),
            deployment_id: id.clone(),
            branch: "feature/widgets".into(),
            commit_sha: "abc123".into(),
            clone_url: "https://github.com/acme/api.git".into(),
            framework: Framework::Nestjs,
            db_type: DbType::Postgres,
            app_port: 3000,
            exposed_app_port: 8000,
            exposed_db_port: 9000,
            status: DeploymentStatus::Running,
            created_at: created,
            updated_at: created,
            url: Some(format!("https://preview.example.com/acme-api/pr-{pr}/")),
            comment_id: Some(100),
        })
        .unwrap();
    h.tracker.allocate_ports(&id, &HashSet::new()).unwrap();
    std::fs::write(
        h.nginx_dir.join(format!("acme-api-pr-{pr}.conf")),
        "location /acme-api/pr-42/ { }\n",
    )
    .unwrap();
}

#[tokio::test]
async fn ttl_expired_deployment_is_reclaimed() {
    let h = harness(HashMap::from([(42, PrState::Open)]), 7);
    seed(&h, 42, 10);

    let outcome = h.reconciler.run_sweep().await;
    assert_eq!(outcome.reclaimed, 1);
    assert_eq!(outcome.errors, 0);

    assert!(h.tracker.get_deployment("acme-api-42").is_none());
    assert!(!h.nginx_dir.join("acme-api-pr-42.conf").exists());
    assert_eq!(h.deployer.cleanups.lock().unwrap().as_slice(), ["acme-api-42"]);
}

#[tokio::test]
async fn fresh_open_deployment_survives() {
    let h = harness(HashMap::from([(42, PrState::Open)]), 7);
    seed(&h, 42, 2);

    let outcome = h.reconciler.run_sweep().await;
    assert_eq!(outcome.reclaimed, 0);
    assert!(h.tracker.get_deployment("acme-api-42").is_some());
    assert!(h.nginx_dir.join("acme-api-pr-42.conf").exists());
}

#[tokio::test]
async fn closed_and_merged_prs_are_reclaimed() {
    let h = harness(
        HashMap::from([(1, PrState::Closed), (2, PrState::Merged), (3, PrState::Open)]),
        7,
    );
    seed(&h, 1, 1);
    seed(&h, 2, 1);
    seed(&h, 3, 1);

    let outcome = h.reconciler.run_sweep().await;
    assert_eq!(outcome.examined, 3);
    assert_eq!(outcome.reclaimed, 2);
    assert!(h.tracker.get_deployment("acme-api-1").is_none());
    assert!(h.tracker.get_deployment("acme-api-2").is_none());
    assert!(h.tracker.get_deployment("acme-api-3").is_some());
}

#[tokio::test]
async fn forge_failure_assumes_open() {
    // PR 42 is not scripted, so the status query errors.
    let h = harness(HashMap::new(), 7);
    seed(&h, 42, 2);

    let outcome = h.reconciler.run_sweep().await;
    assert_eq!(outcome.reclaimed, 0);
    assert!(h.tracker.get_deployment("acme-api-42").is_some());
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let h = harness(HashMap::from([(1, PrState::Closed), (2, PrState::Open)]), 7);
    seed(&h, 1, 1);
    seed(&h, 2, 1);

    let first = h.reconciler.run_sweep().await;
    assert_eq!(first.reclaimed, 1);
    let after_first = h.tracker.get_all_deployments();

    let second = h.reconciler.run_sweep().await;
    assert_eq!(second.reclaimed, 0);
    assert_eq!(second.errors, 0);
    let after_second = h.tracker.get_all_deployments();

    assert_eq!(after_first.len(), after_second.len());
    assert_eq!(
        after_first[0].deployment_id,
        after_second[0].deployment_id
    );
}
