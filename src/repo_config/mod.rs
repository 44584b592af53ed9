//! `preview-config.yml` — the contract a repository opts into previews with.
//!
//! The file lives at the cloned repo's root. Required fields have no
//! defaults; a deploy without a valid config fails before any container
//! work starts.

pub mod detect;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

pub const CONFIG_FILE: &str = "preview-config.yml";

// ─── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Nestjs,
    Go,
    Laravel,
    Rust,
    Python,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nestjs => "nestjs",
            Self::Go => "go",
            Self::Laravel => "laravel",
            Self::Rust => "rust",
            Self::Python => "python",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "nestjs" => Some(Self::Nestjs),
            "go" => Some(Self::Go),
            "laravel" => Some(Self::Laravel),
            "rust" => Some(Self::Rust),
            "python" => Some(Self::Python),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Postgres,
    Mysql,
    Mongodb,
}

impl DbType {
    /// Canonical compose service name — also the in-network hostname.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mongodb => "mongodb",
        }
    }

    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Mysql => "mysql",
            Self::Mongodb => "mongodb",
        }
    }

    /// In-container port the database listens on.
    pub fn port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
            Self::Mongodb => 27017,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "mongodb" => Some(Self::Mongodb),
            _ => None,
        }
    }
}

/// Sidecar services a repo may declare besides its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtraService {
    Redis,
}

impl ExtraService {
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Validated `preview-config.yml`.
#[derive(Debug, Clone, Serialize)]
pub struct RepoPreviewConfig {
    /// Explicit framework override. When absent the detector decides.
    pub framework: Option<Framework>,
    pub database: DbType,
    /// Always starts with `/`.
    pub health_check_path: String,
    /// In-container port the app listens on.
    pub app_port: u16,
    /// Env var name the app reads its port from.
    pub app_port_env: String,
    /// Framework-specific entry point (main module, binary name, ...).
    pub app_entrypoint: String,
    /// Host-side commands run in the working tree before the image build.
    pub build_commands: Vec<String>,
    pub extra_services: Vec<ExtraService>,
    /// `KEY=VAL` pairs appended to the app container environment.
    pub env: Vec<String>,
    /// Single env file path handed to the app service.
    pub env_file: Option<String>,
    /// Commands run inside the app container before its main process.
    pub startup_commands: Vec<String>,
    /// Alternate Dockerfile path relative to the repo root.
    pub dockerfile: Option<String>,
}

/// Shape as it comes off the YAML parser, before validation.
#[derive(Debug, Deserialize)]
struct RawConfig {
    framework: Option<String>,
    database: Option<String>,
    health_check_path: Option<String>,
    app_port: Option<i64>,
    app_port_env: Option<String>,
    app_entrypoint: Option<String>,
    #[serde(default)]
    build_commands: Vec<String>,
    #[serde(default)]
    extra_services: Vec<String>,
    #[serde(default)]
    env: Vec<String>,
    env_file: Option<serde_yaml::Value>,
    #[serde(default)]
    startup_commands: Vec<String>,
    dockerfile: Option<String>,
}

/// Read and validate `preview-config.yml` from a cloned working tree.
pub fn load(work_dir: &Path) -> Result<RepoPreviewConfig> {
    let path = work_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Err(OrchestratorError::ConfigMissing.into());
    }
    let content = std::fs::read_to_string(&path)?;
    parse(&content)
}

/// Parse and validate config text. Split from [`load`] so tests can feed
/// YAML without touching disk.
pub fn parse(content: &str) -> Result<RepoPreviewConfig> {
    let raw: RawConfig = serde_yaml::from_str(content)
        .map_err(|e| OrchestratorError::ConfigInvalid(e.to_string()))?;
    validate(raw).map_err(Into::into)
}

fn validate(raw: RawConfig) -> Result<RepoPreviewConfig, OrchestratorError> {
    let invalid = |msg: String| OrchestratorError::ConfigInvalid(msg);

    let framework = match raw.framework.as_deref() {
        None => None,
        Some(s) => Some(
            Framework::parse(s)
                .ok_or_else(|| invalid(format!("unknown framework '{s}' (expected one of nestjs, go, laravel, rust, python)")))?,
        ),
    };

    let database = raw
        .database
        .as_deref()
        .ok_or_else(|| invalid("missing required field `database`".into()))
        .and_then(|s| {
            DbType::parse(s).ok_or_else(|| {
                invalid(format!("unknown database '{s}' (expected one of postgres, mysql, mongodb)"))
            })
        })?;

    let health_check_path = raw
        .health_check_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| invalid("missing required field `health_check_path`".into()))?;
    let health_check_path = if health_check_path.starts_with('/') {
        health_check_path
    } else {
        format!("/{health_check_path}")
    };

    let app_port = match raw.app_port {
        Some(p) if p > 0 && p <= u16::MAX as i64 => p as u16,
        Some(p) => return Err(invalid(format!("`app_port` must be a positive port number, got {p}"))),
        None => return Err(invalid("missing required field `app_port`".into())),
    };

    let app_port_env = raw
        .app_port_env
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid("missing required field `app_port_env`".into()))?;

    let app_entrypoint = raw
        .app_entrypoint
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid("missing required field `app_entrypoint`".into()))?;

    let mut extra_services = Vec::new();
    for s in &raw.extra_services {
        match s.as_str() {
            "redis" => extra_services.push(ExtraService::Redis),
            other => {
                return Err(invalid(format!(
                    "unknown extra service '{other}' (databases are declared via `database`)"
                )))
            }
        }
    }

    for pair in &raw.env {
        if !pair.contains('=') {
            return Err(invalid(format!("`env` entry '{pair}' is not of the form KEY=VAL")));
        }
    }

    let env_file = match raw.env_file {
        None => None,
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Sequence(_)) => {
            return Err(invalid(
                "`env_file` must be a single path, not a list of paths".into(),
            ))
        }
        Some(other) => {
            return Err(invalid(format!("`env_file` must be a string path, got {other:?}")))
        }
    };

    Ok(RepoPreviewConfig {
        framework,
        database,
        health_check_path,
        app_port,
        app_port_env,
        app_entrypoint,
        build_commands: raw.build_commands,
        extra_services,
        env: raw.env,
        env_file,
        startup_commands: raw.startup_commands,
        dockerfile: raw.dockerfile,
    })
}
