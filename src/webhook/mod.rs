//! Webhook dispatch — the deployment state machine.
//!
//! One `pull_request` event comes in; exactly one of deploy / update /
//! cleanup runs under that deployment's lock. PR comments are strictly
//! best-effort: the preview's fate never depends on the forge accepting a
//! comment call.

pub mod signature;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::containers::{PreviewDeployer, PreviewRequest};
use crate::errors::OrchestratorError;
use crate::forge::{comments, ForgeClient};
use crate::locks::DeploymentLocks;
use crate::proxy::ProxyManager;
use crate::tracker::{Deployment, DeploymentStatus, DeploymentTracker};

// ─── Payload ──────────────────────────────────────────────────────────────────

/// The slice of GitHub's `pull_request` event the orchestrator acts on.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub action: String,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub head: Head,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Head {
    #[serde(rename = "ref")]
    pub branch: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub name: String,
    pub clone_url: String,
    pub owner: Owner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Flattened event, after payload validation.
#[derive(Debug, Clone)]
struct PrEvent {
    action: String,
    pr_number: u64,
    branch: String,
    sha: String,
    owner: String,
    repo: String,
    full_name: String,
    clone_url: String,
}

impl PrEvent {
    fn from_payload(payload: WebhookPayload) -> Option<Self> {
        let pr = payload.pull_request?;
        let repo = payload.repository?;
        Some(Self {
            action: payload.action,
            pr_number: pr.number,
            branch: pr.head.branch,
            sha: pr.head.sha,
            owner: repo.owner.login,
            repo: repo.name,
            full_name: repo.full_name,
            clone_url: repo.clone_url,
        })
    }

    fn request(&self) -> PreviewRequest {
        PreviewRequest {
            pr_number: self.pr_number,
            repo_owner: self.owner.clone(),
            repo_name: self.repo.clone(),
            branch: self.branch.clone(),
            commit_sha: self.sha.clone(),
            clone_url: self.clone_url.clone(),
        }
    }
}

// ─── Handler ──────────────────────────────────────────────────────────────────

pub struct WebhookHandler {
    config: Arc<OrchestratorConfig>,
    tracker: Arc<dyn DeploymentTracker>,
    deployer: Arc<dyn PreviewDeployer>,
    proxy: Arc<ProxyManager>,
    forge: Arc<dyn ForgeClient>,
    locks: Arc<DeploymentLocks>,
}

impl WebhookHandler {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        tracker: Arc<dyn DeploymentTracker>,
        deployer: Arc<dyn PreviewDeployer>,
        proxy: Arc<ProxyManager>,
        forge: Arc<dyn ForgeClient>,
        locks: Arc<DeploymentLocks>,
    ) -> Self {
        Self {
            config,
            tracker,
            deployer,
            proxy,
            forge,
            locks,
        }
    }

    /// Dispatch one verified webhook payload. Errors propagate so the HTTP
    /// layer answers 500; a failure comment has already been attempted by
    /// then.
    pub async fn handle(&self, payload: WebhookPayload) -> Result<()> {
        let Some(event) = PrEvent::from_payload(payload) else {
            info!("webhook without pull_request payload — ignoring");
            return Ok(());
        };

        if !self.config.repo_allowed(&event.full_name) {
            warn!(repo = %event.full_name, "webhook from repository outside allow-list");
            return Err(OrchestratorError::AllowlistRejected(event.full_name).into());
        }

        let deployment_id =
            crate::slug::deployment_id(&crate::slug::project_slug(&event.owner, &event.repo), event.pr_number);
        let _guard = self.locks.acquire(&deployment_id).await;

        info!(
            deployment_id,
            action = %event.action,
            sha = %event.sha,
            "handling pull_request webhook"
        );

        let result = match event.action.as_str() {
            "opened" | "reopened" => self.deploy(&event, &deployment_id).await,
            "synchronize" => self.update(&event, &deployment_id).await,
            "closed" => self.cleanup(&event, &deployment_id).await,
            other => {
                info!(action = other, "unhandled pull_request action — ignoring");
                return Ok(());
            }
        };

        if let Err(e) = &result {
            error!(deployment_id, err = %format!("{e:#}"), "webhook handling failed");
            self.post_failure_comment(&event, &deployment_id).await;
        }
        result
    }

    // ─── Deploy ───────────────────────────────────────────────────────────────

    async fn deploy(&self, event: &PrEvent, deployment_id: &str) -> Result<()> {
        // A re-opened PR that still has a live deployment is an update.
        if self.tracker.get_deployment(deployment_id).is_some() {
            info!(deployment_id, "deployment already exists — treating as update");
            return self.update(event, deployment_id).await;
        }

        let comment_id = self
            .try_comment(event, None, &comments::building(&event.sha))
            .await;

        let outcome = self.deployer.deploy_preview(&event.request()).await?;

        let project_slug = crate::slug::project_slug(&event.owner, &event.repo);
        self.proxy
            .add_preview(&project_slug, event.pr_number, outcome.exposed_app_port)
            .await?;

        let now = Utc::now();
        self.tracker.save_deployment(Deployment {
            pr_number: event.pr_number,
            repo_owner: event.owner.clone(),
            repo_name: event.repo.clone(),
            project_slug,
            deployment_id: deployment_id.to_string(),
            branch: event.branch.clone(),
            commit_sha: event.sha.clone(),
            clone_url: event.clone_url.clone(),
            framework: outcome.framework,
            db_type: outcome.db_type,
            app_port: outcome.app_port,
            exposed_app_port: outcome.exposed_app_port,
            exposed_db_port: outcome.exposed_db_port,
            status: DeploymentStatus::Running,
            created_at: now,
            updated_at: now,
            url: Some(outcome.url.clone()),
            comment_id,
        })?;

        self.try_comment(event, comment_id, &comments::success(&outcome.url, &event.sha))
            .await;
        Ok(())
    }

    // ─── Update ───────────────────────────────────────────────────────────────

    async fn update(&self, event: &PrEvent, deployment_id: &str) -> Result<()> {
        let Some(existing) = self.tracker.get_deployment(deployment_id) else {
            info!(deployment_id, "no deployment to update — falling back to deploy");
            return Box::pin(self.deploy(event, deployment_id)).await;
        };

        let comment_id = self
            .try_comment(event, existing.comment_id, &comments::building(&event.sha))
            .await;

        let outcome = self.deployer.update_preview(deployment_id, &event.sha).await?;

        let mut updated = existing;
        updated.commit_sha = event.sha.clone();
        updated.branch = event.branch.clone();
        updated.status = DeploymentStatus::Running;
        updated.updated_at = Utc::now();
        updated.url = Some(outcome.url.clone());
        if comment_id.is_some() {
            updated.comment_id = comment_id;
        }
        self.tracker.save_deployment(updated)?;

        self.try_comment(event, comment_id, &comments::success(&outcome.url, &event.sha))
            .await;
        Ok(())
    }

    // ─── Cleanup ──────────────────────────────────────────────────────────────

    async fn cleanup(&self, event: &PrEvent, deployment_id: &str) -> Result<()> {
        if self.tracker.get_deployment(deployment_id).is_none() {
            info!(deployment_id, "close event for unknown deployment — nothing to do");
            return Ok(());
        }

        self.deployer.cleanup_preview(deployment_id).await?;

        let project_slug = crate::slug::project_slug(&event.owner, &event.repo);
        self.proxy.remove_preview(&project_slug, event.pr_number).await?;
        self.tracker.delete_deployment(deployment_id)?;
        info!(deployment_id, "preview removed after PR close");
        Ok(())
    }

    // ─── Best-effort comments ─────────────────────────────────────────────────

    /// Update `comment_id` if given, else post a new comment. Failures are
    /// logged and swallowed; the returned id (if any) identifies the comment
    /// this deployment owns from here on.
    async fn try_comment(
        &self,
        event: &PrEvent,
        comment_id: Option<u64>,
        body: &str,
    ) -> Option<u64> {
        match comment_id {
            Some(id) => {
                match self
                    .forge
                    .update_comment(&event.owner, &event.repo, id, body)
                    .await
                {
                    Ok(()) => Some(id),
                    Err(e) => {
                        warn!(comment_id = id, err = %format!("{e:#}"), "PR comment update failed — continuing");
                        Some(id)
                    }
                }
            }
            None => {
                match self
                    .forge
                    .post_comment(&event.owner, &event.repo, event.pr_number, body)
                    .await
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(err = %format!("{e:#}"), "PR comment post failed — continuing");
                        None
                    }
                }
            }
        }
    }

    async fn post_failure_comment(&self, event: &PrEvent, deployment_id: &str) {
        let comment_id = self
            .tracker
            .get_deployment(deployment_id)
            .and_then(|d| d.comment_id);
        self.try_comment(event, comment_id, &comments::failure(&event.sha))
            .await;
    }
}
