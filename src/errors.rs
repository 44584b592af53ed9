//! Typed failures for the deploy/update/cleanup paths.
//!
//! Most plumbing uses `anyhow::Result`; this enum exists for the cases the
//! webhook handler and the HTTP layer need to tell apart — which failures
//! earn a PR comment, which trigger cleanup, and which status code goes back
//! to the forge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The cloned repo has no `preview-config.yml` at its root.
    #[error("preview-config.yml not found in repository root")]
    ConfigMissing,

    /// `preview-config.yml` failed to parse or violates the schema.
    #[error("invalid preview-config.yml: {0}")]
    ConfigInvalid(String),

    /// The webhook's repository is not on the configured allow-list.
    #[error("repository '{0}' is not in the allowed repositories list")]
    AllowlistRejected(String),

    /// The `X-Hub-Signature-256` header failed HMAC verification. The
    /// message doubles as the 401 response body.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// Both port pools are exhausted (or a candidate exceeded 65535).
    #[error("no free {pool} ports left in [{base}, 65535]")]
    PortsExhausted { pool: &'static str, base: u16 },

    /// A `build_commands` entry exited non-zero.
    #[error("build command {index} failed ({command}): {stderr}")]
    BuildCommandFailed {
        index: usize,
        command: String,
        stderr: String,
    },

    /// `docker compose up` exited non-zero.
    #[error("compose up failed for {deployment_id}: {stderr}")]
    ContainerUp {
        deployment_id: String,
        stderr: String,
    },

    /// The health poll never saw a 2xx before the attempt budget ran out.
    #[error("health check at {url} did not pass within {attempts} attempts")]
    HealthCheckTimeout { url: String, attempts: u32 },

    /// The proxy config test or reload failed after a route change.
    #[error("proxy reload failed: {0}")]
    ProxyReload(String),

    /// A forge (GitHub) API call failed. Best-effort callers log this and
    /// continue; it never aborts a deploy.
    #[error("forge API call failed: {0}")]
    ForgeApi(String),

    /// The deployment store could not be read or written.
    #[error("deployment store I/O failed: {0}")]
    TrackerIo(String),
}
