//! Git operations on preview working trees.
//!
//! Previews only ever need clone / checkout / hard-reset / fetch against a
//! throwaway directory, so everything runs through the `git` binary with
//! captured stderr rather than an in-process git library.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};

const GIT_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn clone(clone_url: &str, work_dir: &Path) -> Result<()> {
    run_git(None, &["clone", clone_url, &work_dir.to_string_lossy()])
        .await
        .with_context(|| format!("git clone of {clone_url} failed"))
}

pub async fn checkout(work_dir: &Path, branch: &str) -> Result<()> {
    run_git(Some(work_dir), &["checkout", branch])
        .await
        .with_context(|| format!("git checkout {branch} failed"))
}

pub async fn reset_hard(work_dir: &Path, commit_sha: &str) -> Result<()> {
    run_git(Some(work_dir), &["reset", "--hard", commit_sha])
        .await
        .with_context(|| format!("git reset --hard {commit_sha} failed"))
}

pub async fn fetch_origin(work_dir: &Path) -> Result<()> {
    run_git(Some(work_dir), &["fetch", "origin"])
        .await
        .context("git fetch origin failed")
}

async fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<()> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("git {} timed out after {}s", args.join(" "), GIT_TIMEOUT.as_secs()))?
        .context("failed to spawn git")?;

    if !output.status.success() {
        anyhow::bail!(
            "git {} exited {}: {}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
