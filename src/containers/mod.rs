//! Container lifecycle for preview environments.
//!
//! Owns the working trees under the deployments root and every `git` /
//! `docker compose` child process. A deploy that fails after acquiring
//! resources always runs its own cleanup before the error propagates;
//! cleanup failures are logged, never masked over the original error.

pub mod git;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::compose::{self, ComposeRequest, GENERATED_COMPOSE};
use crate::errors::OrchestratorError;
use crate::repo_config::{self, detect, DbType, Framework};
use crate::slug;
use crate::tracker::{DeploymentStatus, DeploymentTracker};

const HEALTH_ATTEMPTS: u32 = 15;
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_RETRY_DELAY: Duration = Duration::from_secs(5);
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);
const COMPOSE_TIMEOUT: Duration = Duration::from_secs(600);

// ─── Types ────────────────────────────────────────────────────────────────────

/// Everything a deploy needs, lifted out of the webhook payload.
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub pr_number: u64,
    pub repo_owner: String,
    pub repo_name: String,
    pub branch: String,
    pub commit_sha: String,
    pub clone_url: String,
}

impl PreviewRequest {
    pub fn project_slug(&self) -> String {
        slug::project_slug(&self.repo_owner, &self.repo_name)
    }

    pub fn deployment_id(&self) -> String {
        slug::deployment_id(&self.project_slug(), self.pr_number)
    }
}

/// What a successful deploy (or update) hands back to the webhook path.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub url: String,
    pub app_port: u16,
    pub exposed_app_port: u16,
    pub exposed_db_port: u16,
    pub framework: Framework,
    pub db_type: DbType,
}

/// Seam over container work so webhook/reconciler tests use a scripted
/// double instead of docker.
#[async_trait]
pub trait PreviewDeployer: Send + Sync {
    async fn deploy_preview(&self, req: &PreviewRequest) -> Result<DeployOutcome>;
    async fn update_preview(&self, deployment_id: &str, new_sha: &str) -> Result<DeployOutcome>;
    async fn cleanup_preview(&self, deployment_id: &str) -> Result<()>;
    async fn get_preview_status(&self, deployment_id: &str) -> Result<DeploymentStatus>;
}

// ─── Manager ──────────────────────────────────────────────────────────────────

pub struct ContainerManager {
    deployments_dir: PathBuf,
    public_base_url: String,
    docker_bin: String,
    tracker: Arc<dyn DeploymentTracker>,
    health_client: reqwest::Client,
}

impl ContainerManager {
    pub fn new(
        deployments_dir: PathBuf,
        public_base_url: String,
        docker_bin: String,
        tracker: Arc<dyn DeploymentTracker>,
    ) -> Result<Self> {
        let health_client = reqwest::Client::builder()
            .timeout(HEALTH_REQUEST_TIMEOUT)
            .build()
            .context("failed to build health-check HTTP client")?;
        Ok(Self {
            deployments_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            docker_bin,
            tracker,
            health_client,
        })
    }

    fn work_dir(&self, project_slug: &str, pr_number: u64) -> PathBuf {
        self.deployments_dir
            .join(project_slug)
            .join(slug::work_dir_name(pr_number))
    }

    fn preview_url(&self, project_slug: &str, pr_number: u64) -> String {
        format!("{}/{project_slug}/pr-{pr_number}/", self.public_base_url)
    }

    /// Host ports currently published by any running container. Engine
    /// trouble degrades to an empty set so allocation can still proceed.
    async fn docker_bound_host_ports(&self) -> HashSet<u16> {
        let output = tokio::process::Command::new(&self.docker_bin)
            .args(["ps", "--format", "{{.Ports}}"])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                parse_published_ports(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                warn!(
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "docker ps failed — allocating without engine port info"
                );
                HashSet::new()
            }
            Err(e) => {
                warn!(err = %e, "docker unavailable — allocating without engine port info");
                HashSet::new()
            }
        }
    }

    async fn run_build_commands(&self, work_dir: &Path, commands: &[String]) -> Result<()> {
        for (index, command) in commands.iter().enumerate() {
            info!(index, command = %command, "running build command");
            let output = tokio::time::timeout(
                BUILD_TIMEOUT,
                tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .current_dir(work_dir)
                    .stdin(Stdio::null())
                    .output(),
            )
            .await
            .map_err(|_| OrchestratorError::BuildCommandFailed {
                index,
                command: command.clone(),
                stderr: format!("timed out after {}s", BUILD_TIMEOUT.as_secs()),
            })?
            .context("failed to spawn build command")?;

            if !output.status.success() {
                return Err(OrchestratorError::BuildCommandFailed {
                    index,
                    command: command.clone(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn compose_up(&self, deployment_id: &str, work_dir: &Path) -> Result<()> {
        let output = tokio::time::timeout(
            COMPOSE_TIMEOUT,
            tokio::process::Command::new(&self.docker_bin)
                .args([
                    "compose",
                    "-p",
                    deployment_id,
                    "-f",
                    GENERATED_COMPOSE,
                    "up",
                    "-d",
                    "--build",
                ])
                .current_dir(work_dir)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| OrchestratorError::ContainerUp {
            deployment_id: deployment_id.to_string(),
            stderr: format!("compose up timed out after {}s", COMPOSE_TIMEOUT.as_secs()),
        })?
        .context("failed to spawn docker compose")?;

        if !output.status.success() {
            return Err(OrchestratorError::ContainerUp {
                deployment_id: deployment_id.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn compose_down(&self, deployment_id: &str, work_dir: &Path) {
        let compose_file = work_dir.join(GENERATED_COMPOSE);
        if !compose_file.exists() {
            debug!(deployment_id, "no generated compose file — skipping compose down");
            return;
        }
        let result = tokio::process::Command::new(&self.docker_bin)
            .args([
                "compose",
                "-p",
                deployment_id,
                "-f",
                GENERATED_COMPOSE,
                "down",
                "-v",
            ])
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => {}
            Ok(out) => warn!(
                deployment_id,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "compose down failed — continuing cleanup"
            ),
            Err(e) => warn!(deployment_id, err = %e, "compose down could not run — continuing cleanup"),
        }
    }

    async fn poll_health(&self, exposed_app_port: u16, health_path: &str) -> Result<()> {
        let url = format!("http://localhost:{exposed_app_port}{health_path}");
        for attempt in 1..=HEALTH_ATTEMPTS {
            match self.health_client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(%url, attempt, "health check passed");
                    return Ok(());
                }
                Ok(resp) => {
                    debug!(%url, attempt, status = %resp.status(), "health check not ready")
                }
                Err(e) => debug!(%url, attempt, err = %e, "health check unreachable"),
            }
            if attempt < HEALTH_ATTEMPTS {
                tokio::time::sleep(HEALTH_RETRY_DELAY).await;
            }
        }
        Err(OrchestratorError::HealthCheckTimeout {
            url,
            attempts: HEALTH_ATTEMPTS,
        }
        .into())
    }

    /// The deploy body; failures bubble up to `deploy_preview`, which owns
    /// the cleanup-and-rethrow.
    async fn try_deploy(&self, req: &PreviewRequest) -> Result<DeployOutcome> {
        let project_slug = req.project_slug();
        let deployment_id = req.deployment_id();
        let work_dir = self.work_dir(&project_slug, req.pr_number);

        // A stale tree from a crashed deploy is re-created from scratch.
        if work_dir.exists() {
            tokio::fs::remove_dir_all(&work_dir)
                .await
                .with_context(|| format!("failed to clear stale {}", work_dir.display()))?;
        }
        tokio::fs::create_dir_all(&work_dir)
            .await
            .with_context(|| format!("failed to create {}", work_dir.display()))?;

        let busy_ports = self.docker_bound_host_ports().await;
        let allocation = self.tracker.allocate_ports(&deployment_id, &busy_ports)?;

        git::clone(&req.clone_url, &work_dir).await?;
        git::checkout(&work_dir, &req.branch).await?;
        git::reset_hard(&work_dir, &req.commit_sha).await?;

        let config = repo_config::load(&work_dir)?;
        let framework = detect::resolve_framework(&work_dir, &config);
        info!(
            deployment_id,
            framework = framework.as_str(),
            db = config.database.service_name(),
            app_port = config.app_port,
            "repo preview config loaded"
        );

        self.run_build_commands(&work_dir, &config.build_commands).await?;

        compose::dockerfile::ensure_dockerfile(
            &work_dir,
            framework,
            config.database,
            config.app_port,
            &config.app_entrypoint,
        )?;
        compose::materialize(
            &work_dir,
            &ComposeRequest {
                slug: &project_slug,
                pr_number: req.pr_number,
                exposed_app_port: allocation.exposed_app_port,
                exposed_db_port: allocation.exposed_db_port,
                framework,
                config: &config,
            },
        )?;

        self.compose_up(&deployment_id, &work_dir).await?;
        self.poll_health(allocation.exposed_app_port, &config.health_check_path)
            .await?;

        Ok(DeployOutcome {
            url: self.preview_url(&project_slug, req.pr_number),
            app_port: config.app_port,
            exposed_app_port: allocation.exposed_app_port,
            exposed_db_port: allocation.exposed_db_port,
            framework,
            db_type: config.database,
        })
    }

    async fn try_update(&self, deployment_id: &str, new_sha: &str) -> Result<DeployOutcome> {
        let deployment = self
            .tracker
            .get_deployment(deployment_id)
            .ok_or_else(|| anyhow::anyhow!("no deployment '{deployment_id}' to update"))?;
        let work_dir = self.work_dir(&deployment.project_slug, deployment.pr_number);

        git::fetch_origin(&work_dir).await?;
        git::reset_hard(&work_dir, new_sha).await?;

        let config = repo_config::load(&work_dir)?;
        let framework = detect::resolve_framework(&work_dir, &config);

        self.run_build_commands(&work_dir, &config.build_commands).await?;

        compose::dockerfile::ensure_dockerfile(
            &work_dir,
            framework,
            config.database,
            config.app_port,
            &config.app_entrypoint,
        )?;
        compose::materialize(
            &work_dir,
            &ComposeRequest {
                slug: &deployment.project_slug,
                pr_number: deployment.pr_number,
                exposed_app_port: deployment.exposed_app_port,
                exposed_db_port: deployment.exposed_db_port,
                framework,
                config: &config,
            },
        )?;

        self.compose_up(deployment_id, &work_dir).await?;
        self.poll_health(deployment.exposed_app_port, &config.health_check_path)
            .await?;

        Ok(DeployOutcome {
            url: self.preview_url(&deployment.project_slug, deployment.pr_number),
            app_port: config.app_port,
            exposed_app_port: deployment.exposed_app_port,
            exposed_db_port: deployment.exposed_db_port,
            framework,
            db_type: config.database,
        })
    }
}

#[async_trait]
impl PreviewDeployer for ContainerManager {
    async fn deploy_preview(&self, req: &PreviewRequest) -> Result<DeployOutcome> {
        let deployment_id = req.deployment_id();
        info!(
            deployment_id,
            repo = %format!("{}/{}", req.repo_owner, req.repo_name),
            sha = %req.commit_sha,
            "deploying preview"
        );

        match self.try_deploy(req).await {
            Ok(outcome) => {
                info!(deployment_id, url = %outcome.url, "preview deployed");
                Ok(outcome)
            }
            Err(deploy_err) => {
                error!(deployment_id, err = %format!("{deploy_err:#}"), "deploy failed — cleaning up");
                if let Err(cleanup_err) = self.cleanup_preview(&deployment_id).await {
                    warn!(deployment_id, err = %format!("{cleanup_err:#}"), "cleanup after failed deploy also failed");
                }
                Err(deploy_err)
            }
        }
    }

    async fn update_preview(&self, deployment_id: &str, new_sha: &str) -> Result<DeployOutcome> {
        info!(deployment_id, sha = %new_sha, "updating preview");
        self.try_update(deployment_id, new_sha).await
    }

    async fn cleanup_preview(&self, deployment_id: &str) -> Result<()> {
        // Prefer the tracker record; fall back to parsing the id so a
        // half-deployed environment (no record yet) still gets reclaimed.
        let (project_slug, pr_number) = match self.tracker.get_deployment(deployment_id) {
            Some(d) => (d.project_slug, d.pr_number),
            None => match split_deployment_id(deployment_id) {
                Some(parts) => {
                    debug!(deployment_id, "no tracker record — cleaning by id");
                    parts
                }
                None => {
                    warn!(deployment_id, "unparseable deployment id — releasing ports only");
                    return self.tracker.release_ports(deployment_id);
                }
            },
        };

        let work_dir = self.work_dir(&project_slug, pr_number);
        self.compose_down(deployment_id, &work_dir).await;

        if work_dir.exists() {
            tokio::fs::remove_dir_all(&work_dir)
                .await
                .with_context(|| format!("failed to remove {}", work_dir.display()))?;
        }

        self.tracker.release_ports(deployment_id)?;
        info!(deployment_id, "preview cleaned up");
        Ok(())
    }

    async fn get_preview_status(&self, deployment_id: &str) -> Result<DeploymentStatus> {
        let Some((project_slug, pr_number)) = self
            .tracker
            .get_deployment(deployment_id)
            .map(|d| (d.project_slug, d.pr_number))
            .or_else(|| split_deployment_id(deployment_id))
        else {
            return Ok(DeploymentStatus::Stopped);
        };

        let container = format!("{project_slug}-pr-{pr_number}-app");
        let output = tokio::process::Command::new(&self.docker_bin)
            .args(["inspect", "--format", "{{.State.Status}}", &container])
            .stdin(Stdio::null())
            .output()
            .await
            .context("failed to spawn docker inspect")?;

        if !output.status.success() {
            // Container gone — from the orchestrator's view that is stopped.
            return Ok(DeploymentStatus::Stopped);
        }
        match String::from_utf8_lossy(&output.stdout).trim() {
            "running" => Ok(DeploymentStatus::Running),
            "created" | "paused" | "exited" => Ok(DeploymentStatus::Stopped),
            _ => Ok(DeploymentStatus::Failed),
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// `<slug>-<pr>` → (`slug`, `pr`). The pr number is the trailing dash-
/// separated integer.
fn split_deployment_id(deployment_id: &str) -> Option<(String, u64)> {
    let (slug, pr) = deployment_id.rsplit_once('-')?;
    let pr: u64 = pr.parse().ok()?;
    if slug.is_empty() {
        return None;
    }
    Some((slug.to_string(), pr))
}

/// Extract host ports from `docker ps --format {{.Ports}}` output, e.g.
/// `0.0.0.0:8000->3000/tcp, [::]:8000->3000/tcp`.
fn parse_published_ports(output: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for token in output.split([',', '\n']) {
        let token = token.trim();
        let Some((host_part, _container_part)) = token.split_once("->") else {
            continue;
        };
        if let Some(port) = host_part.rsplit(':').next() {
            if let Ok(port) = port.parse::<u16>() {
                ports.insert(port);
            }
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_ps_port_lines() {
        let out = "0.0.0.0:8000->3000/tcp, [::]:8000->3000/tcp\n0.0.0.0:9005->5432/tcp\n\n6379/tcp\n";
        let ports = parse_published_ports(out);
        assert!(ports.contains(&8000));
        assert!(ports.contains(&9005));
        // Unpublished container port is not a host binding.
        assert!(!ports.contains(&6379));
        assert_eq!(ports.len(), 2);
    }

    #[test]
    fn splits_deployment_ids() {
        assert_eq!(split_deployment_id("acme-api-42"), Some(("acme-api".into(), 42)));
        assert_eq!(split_deployment_id("a-1"), Some(("a".into(), 1)));
        assert_eq!(split_deployment_id("noprnumber"), None);
        assert_eq!(split_deployment_id("-42"), None);
    }
}
