//! Daemon configuration, read from the environment at startup.
//!
//! Required variables are validated together so a misconfigured unit file
//! reports every missing name at once instead of one per restart.

use std::path::PathBuf;

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// GitHub API token used for PR comments and status queries.
    pub github_token: String,
    /// Shared secret for webhook HMAC verification.
    pub webhook_secret: String,
    /// `owner/repo` names allowed to trigger deployments.
    pub allowed_repos: Vec<String>,
    /// Public base URL previews are served under (no trailing slash).
    pub preview_base_url: String,
    /// Root directory for per-deployment working trees.
    pub deployments_dir: PathBuf,
    /// Directory nginx includes per-deployment route files from.
    pub nginx_config_dir: PathBuf,
    /// Path of the JSON deployment store.
    pub deployments_db: PathBuf,
    /// Deployments older than this many days are reclaimed by the reconciler.
    pub cleanup_ttl_days: i64,
    /// Hours between reconciler sweeps.
    pub cleanup_interval_hours: u64,
    /// HTTP listen port.
    pub port: u16,
    /// Container engine binary (`docker`), overridable for tests.
    pub docker_bin: String,
}

impl OrchestratorConfig {
    /// Load from the process environment. Fails listing every missing
    /// required variable.
    pub fn from_env() -> Result<Self> {
        let mut missing = Vec::new();
        let mut required = |name: &'static str| -> String {
            match std::env::var(name) {
                Ok(v) if !v.trim().is_empty() => v,
                _ => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let github_token = required("GITHUB_TOKEN");
        let webhook_secret = required("GITHUB_WEBHOOK_SECRET");
        let allowed_repos_raw = required("ALLOWED_REPOS");
        let preview_base_url = required("PREVIEW_BASE_URL");

        if !missing.is_empty() {
            bail!("missing required environment variables: {}", missing.join(", "));
        }

        let allowed_repos: Vec<String> = allowed_repos_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed_repos.is_empty() {
            bail!("ALLOWED_REPOS is set but contains no owner/repo entries");
        }

        Ok(Self {
            github_token,
            webhook_secret,
            allowed_repos,
            preview_base_url: preview_base_url.trim_end_matches('/').to_string(),
            deployments_dir: env_path("DEPLOYMENTS_DIR", "/opt/preview-deployments"),
            nginx_config_dir: env_path("NGINX_CONFIG_DIR", "/etc/nginx/preview-configs"),
            deployments_db: env_path("DEPLOYMENTS_DB", "/opt/preview-deployer/deployments.json"),
            cleanup_ttl_days: env_parse("CLEANUP_TTL_DAYS", 7)?,
            cleanup_interval_hours: env_parse("CLEANUP_INTERVAL_HOURS", 6)?,
            port: env_parse("ORCHESTRATOR_PORT", 3000)?,
            docker_bin: std::env::var("DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
        })
    }

    /// Membership test for the repository allow-list (`owner/repo`).
    pub fn repo_allowed(&self, full_name: &str) -> bool {
        self.allowed_repos.iter().any(|r| r == full_name)
    }
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name} value '{v}': {e}")),
        Err(_) => Ok(default),
    }
}
