//! Durable deployment tracker.
//!
//! One JSON document holds every deployment record and its host-port
//! allocation. Reads serve from an in-memory copy; every write rewrites the
//! file atomically (tmp file → rename to prevent partial reads). The mutex
//! around the state doubles as the allocator's critical section: no await
//! points happen while it is held, so concurrent deploys cannot mint the
//! same host port twice.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::repo_config::{DbType, Framework};

pub const APP_PORT_BASE: u16 = 8000;
pub const DB_PORT_BASE: u16 = 9000;
pub const PORT_CEILING: u16 = u16::MAX;

// ─── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Building,
    Running,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// The authoritative record of one preview environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub pr_number: u64,
    pub repo_owner: String,
    pub repo_name: String,
    pub project_slug: String,
    pub deployment_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub clone_url: String,
    pub framework: Framework,
    pub db_type: DbType,
    /// Port the app listens on inside its container.
    pub app_port: u16,
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Id of the PR comment this deployment owns and keeps updating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortAllocation {
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
}

/// On-disk document shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Store {
    #[serde(default)]
    deployments: BTreeMap<String, Deployment>,
    #[serde(default, rename = "portAllocations")]
    port_allocations: BTreeMap<String, PortAllocation>,
}

// ─── Capability trait ─────────────────────────────────────────────────────────

/// Narrow seam over the store so webhook/reconciler tests can run against
/// an in-memory double.
pub trait DeploymentTracker: Send + Sync {
    fn get_deployment(&self, id: &str) -> Option<Deployment>;
    fn get_all_deployments(&self) -> Vec<Deployment>;
    /// Whole days since the record was created.
    fn get_deployment_age_days(&self, id: &str) -> Option<i64>;
    fn save_deployment(&self, deployment: Deployment) -> Result<()>;
    fn delete_deployment(&self, id: &str) -> Result<()>;
    fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<()>;
    fn update_comment(&self, id: &str, comment_id: u64) -> Result<()>;
    fn allocate_ports(&self, id: &str, exclude_ports: &HashSet<u16>) -> Result<PortAllocation>;
    fn release_ports(&self, id: &str) -> Result<()>;
}

// ─── File-backed implementation ───────────────────────────────────────────────

#[derive(Debug)]
pub struct FileTracker {
    path: PathBuf,
    state: Mutex<Store>,
}

impl FileTracker {
    /// Open (or lazily create) the store at `path`. A missing file is an
    /// empty store; it is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                OrchestratorError::TrackerIo(format!(
                    "deployment store at {} is corrupt: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Store::default(),
            Err(e) => {
                return Err(OrchestratorError::TrackerIo(format!(
                    "failed to read {}: {e}",
                    path.display()
                ))
                .into())
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Serialize the store and swap it into place. Called with the state
    /// lock held.
    fn persist(&self, store: &Store) -> Result<()> {
        let io_err = |detail: String| OrchestratorError::TrackerIo(detail);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| io_err(format!("failed to create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(store)
            .map_err(|e| io_err(format!("failed to serialize deployment store: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| io_err(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| io_err(format!("failed to replace {}: {e}", self.path.display())))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        // A poisoned store mutex means a writer panicked mid-mutation; the
        // in-memory copy is still the last consistent snapshot.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeploymentTracker for FileTracker {
    fn get_deployment(&self, id: &str) -> Option<Deployment> {
        self.lock().deployments.get(id).cloned()
    }

    fn get_all_deployments(&self) -> Vec<Deployment> {
        self.lock().deployments.values().cloned().collect()
    }

    fn get_deployment_age_days(&self, id: &str) -> Option<i64> {
        let created = self.lock().deployments.get(id)?.created_at;
        Some((Utc::now() - created).num_days())
    }

    fn save_deployment(&self, deployment: Deployment) -> Result<()> {
        let mut store = self.lock();
        store
            .deployments
            .insert(deployment.deployment_id.clone(), deployment);
        self.persist(&store)
    }

    fn delete_deployment(&self, id: &str) -> Result<()> {
        let mut store = self.lock();
        store.deployments.remove(id);
        self.persist(&store)
    }

    fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<()> {
        let mut store = self.lock();
        let deployment = store
            .deployments
            .get_mut(id)
            .ok_or_else(|| anyhow!("no deployment '{id}' in store"))?;
        deployment.status = status;
        deployment.updated_at = Utc::now();
        self.persist(&store)
    }

    fn update_comment(&self, id: &str, comment_id: u64) -> Result<()> {
        let mut store = self.lock();
        let deployment = store
            .deployments
            .get_mut(id)
            .ok_or_else(|| anyhow!("no deployment '{id}' in store"))?;
        deployment.comment_id = Some(comment_id);
        deployment.updated_at = Utc::now();
        self.persist(&store)
    }

    fn allocate_ports(&self, id: &str, exclude_ports: &HashSet<u16>) -> Result<PortAllocation> {
        let mut store = self.lock();

        // Idempotent: a deployment that already holds ports keeps them.
        if let Some(existing) = store.port_allocations.get(id) {
            return Ok(*existing);
        }

        let app = pick_port(APP_PORT_BASE, "app", &store, exclude_ports, |a| {
            a.exposed_app_port
        })?;
        let db = pick_port(DB_PORT_BASE, "db", &store, exclude_ports, |a| {
            a.exposed_db_port
        })?;

        let allocation = PortAllocation {
            exposed_app_port: app,
            exposed_db_port: db,
        };
        store.port_allocations.insert(id.to_string(), allocation);
        self.persist(&store)?;
        Ok(allocation)
    }

    fn release_ports(&self, id: &str) -> Result<()> {
        let mut store = self.lock();
        if store.port_allocations.remove(id).is_some() {
            self.persist(&store)?;
        }
        Ok(())
    }
}

/// Smallest port ≥ `base` not used by a live allocation and not excluded.
fn pick_port(
    base: u16,
    pool: &'static str,
    store: &Store,
    exclude: &HashSet<u16>,
    port_of: impl Fn(&PortAllocation) -> u16,
) -> Result<u16> {
    let used: HashSet<u16> = store.port_allocations.values().map(&port_of).collect();
    let mut candidate = base;
    loop {
        if !used.contains(&candidate) && !exclude.contains(&candidate) {
            return Ok(candidate);
        }
        if candidate == PORT_CEILING {
            return Err(OrchestratorError::PortsExhausted { pool, base }.into());
        }
        candidate += 1;
    }
}
