//! GitHub client — PR comments and PR state queries.
//!
//! Everything here is best-effort from the deploy path's perspective: a
//! failed comment never sinks a deployment, so callers log and continue.
//! The trait exists so webhook and reconciler tests run against a recording
//! double instead of the network.

pub mod comments;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::OrchestratorError;

/// Where a pull request currently stands on the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Post a new comment on the PR; returns the forge's comment id.
    async fn post_comment(&self, owner: &str, repo: &str, pr_number: u64, body: &str)
        -> Result<u64>;

    /// Replace the body of an existing comment.
    async fn update_comment(&self, owner: &str, repo: &str, comment_id: u64, body: &str)
        -> Result<()>;

    /// Query whether the PR is open, closed, or merged.
    async fn pr_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<PrState>;
}

// ─── GitHub REST v3 implementation ───────────────────────────────────────────

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    state: String,
    #[serde(default)]
    merged: bool,
}

impl GithubClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base(token, "https://api.github.com".to_string())
    }

    /// Point the client at a different API root (tests, GHE).
    pub fn with_base(token: String, api_base: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("previewd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build forge HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }
}

/// Every failure talking to the forge surfaces as one error kind, so
/// callers can treat "the forge is unhappy" uniformly.
fn forge_err(detail: impl std::fmt::Display) -> anyhow::Error {
    OrchestratorError::ForgeApi(detail.to_string()).into()
}

#[async_trait]
impl ForgeClient for GithubClient {
    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<u64> {
        let url = format!(
            "{}/repos/{owner}/{repo}/issues/{pr_number}/comments",
            self.api_base
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(forge_err)?
            .error_for_status()
            .map_err(|e| forge_err(format!("comment create rejected: {e}")))?;

        let comment: CommentResponse = resp.json().await.map_err(forge_err)?;
        debug!(comment_id = comment.id, pr_number, "posted PR comment");
        Ok(comment.id)
    }

    async fn update_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{owner}/{repo}/issues/comments/{comment_id}",
            self.api_base
        );
        self.http
            .patch(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(forge_err)?
            .error_for_status()
            .map_err(|e| forge_err(format!("comment update rejected: {e}")))?;
        Ok(())
    }

    async fn pr_status(&self, owner: &str, repo: &str, pr_number: u64) -> Result<PrState> {
        let url = format!("{}/repos/{owner}/{repo}/pulls/{pr_number}", self.api_base);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(forge_err)?
            .error_for_status()
            .map_err(|e| forge_err(format!("pull request lookup rejected: {e}")))?;

        let pull: PullResponse = resp.json().await.map_err(forge_err)?;
        match (pull.state.as_str(), pull.merged) {
            (_, true) => Ok(PrState::Merged),
            ("open", _) => Ok(PrState::Open),
            ("closed", _) => Ok(PrState::Closed),
            (other, _) => Err(forge_err(format!("unexpected pull request state '{other}'"))),
        }
    }
}
