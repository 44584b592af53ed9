//! Per-deployment nginx route files.
//!
//! Each preview gets one `<slug>-pr-<N>.conf` in the config directory, which
//! nginx includes from inside its default server block — the snippets
//! therefore contain bare `location` blocks and never a `server {}` wrapper.
//! Every add/remove is followed by a config-test-and-reload.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;

// ─── Reload capability ────────────────────────────────────────────────────────

/// Seam over the proxy process so tests run without an nginx on the host.
#[async_trait]
pub trait ProxyReload: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Production reload: `nginx -t` to validate, then `nginx -s reload`.
pub struct NginxReload;

#[async_trait]
impl ProxyReload for NginxReload {
    async fn reload(&self) -> Result<()> {
        run_nginx(&["-t"]).await.context("nginx config test failed")?;
        run_nginx(&["-s", "reload"]).await.context("nginx reload failed")?;
        Ok(())
    }
}

async fn run_nginx(args: &[&str]) -> Result<()> {
    let output = tokio::process::Command::new("nginx")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to spawn nginx")?;
    if !output.status.success() {
        anyhow::bail!(
            "nginx {} exited {}: {}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

// ─── Route-file manager ───────────────────────────────────────────────────────

pub struct ProxyManager {
    config_dir: PathBuf,
    reloader: Arc<dyn ProxyReload>,
}

impl ProxyManager {
    pub fn new(config_dir: impl Into<PathBuf>, reloader: Arc<dyn ProxyReload>) -> Self {
        Self {
            config_dir: config_dir.into(),
            reloader,
        }
    }

    fn route_file(&self, slug: &str, pr_number: u64) -> PathBuf {
        self.config_dir.join(format!("{slug}-pr-{pr_number}.conf"))
    }

    /// Publish the path-based route `/<slug>/pr-<N>/` → `localhost:<port>`.
    pub async fn add_preview(&self, slug: &str, pr_number: u64, app_port: u16) -> Result<()> {
        tokio::fs::create_dir_all(&self.config_dir)
            .await
            .with_context(|| format!("failed to create {}", self.config_dir.display()))?;

        let path = self.route_file(slug, pr_number);
        let content = route_config(slug, pr_number, app_port);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        set_world_readable(&path).await?;
        info!(route = %path.display(), app_port, "preview route published");

        self.reload().await
    }

    /// Remove the route file (absent is fine) and reload.
    pub async fn remove_preview(&self, slug: &str, pr_number: u64) -> Result<()> {
        let path = self.route_file(slug, pr_number);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(route = %path.display(), "preview route removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(route = %path.display(), "preview route already absent");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()))
            }
        }
        self.reload().await
    }

    async fn reload(&self) -> Result<()> {
        self.reloader.reload().await.map_err(|e| {
            warn!(err = %e, "proxy reload failed");
            OrchestratorError::ProxyReload(format!("{e:#}")).into()
        })
    }
}

/// The snippet is included inside the default server block; the trailing
/// slash on `proxy_pass` strips the `/<slug>/pr-<N>/` prefix on the way
/// upstream.
fn route_config(slug: &str, pr_number: u64, app_port: u16) -> String {
    format!(
        r#"location /{slug}/pr-{pr_number}/ {{
    proxy_pass http://localhost:{app_port}/;
    proxy_http_version 1.1;
    proxy_set_header Host $host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_set_header Upgrade $http_upgrade;
    proxy_set_header Connection "upgrade";
    proxy_read_timeout 90s;
}}
"#
    )
}

#[cfg(unix)]
async fn set_world_readable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
async fn set_world_readable(_path: &Path) -> Result<()> {
    Ok(())
}
