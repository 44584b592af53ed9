//! HTTP surface tests.
//!
//! Boots the real axum router on a random port with scripted deployer and
//! forge doubles, then drives it over the wire.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use previewd::config::OrchestratorConfig;
use previewd::containers::{DeployOutcome, PreviewDeployer, PreviewRequest};
use previewd::forge::{ForgeClient, PrState};
use previewd::proxy::{ProxyManager, ProxyReload};
use previewd::repo_config::{DbType, Framework};
use previewd::rest;
use previewd::tracker::{DeploymentStatus, DeploymentTracker, FileTracker};
use previewd::webhook::signature;
use previewd::AppContext;
use tempfile::TempDir;

struct NoopReload;

#[async_trait]
impl ProxyReload for NoopReload {
    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

struct FakeDeployer {
    tracker: Arc<dyn DeploymentTracker>,
}

#[async_trait]
impl PreviewDeployer for FakeDeployer {
    async fn deploy_preview(&self, req: &PreviewRequest) -> Result<DeployOutcome> {
        let allocation = self
            .tracker
            .allocate_ports(&req.deployment_id(), &HashSet::new())?;
        Ok(DeployOutcome {
            url: format!(
                "https://preview.example.com/{}/pr-{}/",
                req.project_slug(),
                req.pr_number
            ),
            app_port: 3000,
            exposed_app_port: allocation.exposed_app_port,
            exposed_db_port: allocation.exposed_db_port,
            framework: Framework::Nestjs,
            db_type: DbType::Postgres,
        })
    }

    async fn update_preview(&self, _id: &str, _sha: &str) -> Result<DeployOutcome> {
        unreachable!("not exercised over HTTP in this suite")
    }

    async fn cleanup_preview(&self, deployment_id: &str) -> Result<()> {
        self.tracker.release_ports(deployment_id)
    }

    async fn get_preview_status(&self, _id: &str) -> Result<DeploymentStatus> {
        Ok(DeploymentStatus::Running)
    }
}

struct QuietForge;

#[async_trait]
impl ForgeClient for QuietForge {
    async fn post_comment(&self, _o: &str, _r: &str, _pr: u64, _body: &str) -> Result<u64> {
        Ok(7)
    }
    async fn update_comment(&self, _o: &str, _r: &str, _id: u64, _body: &str) -> Result<()> {
        Ok(())
    }
    async fn pr_status(&self, _o: &str, _r: &str, _pr: u64) -> Result<PrState> {
        Ok(PrState::Open)
    }
}

const SECRET: &str = "hook-secret";

struct Server {
    _dir: TempDir,
    addr: SocketAddr,
    tracker: Arc<FileTracker>,
    http: reqwest::Client,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn start_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(OrchestratorConfig {
        github_token: "test-token".into(),
        webhook_secret: SECRET.into(),
        allowed_repos: vec!["acme/api".into()],
        preview_base_url: "https://preview.example.com".into(),
        deployments_dir: dir.path().join("deployments"),
        nginx_config_dir: dir.path().join("nginx"),
        deployments_db: dir.path().join("deployments.json"),
        cleanup_ttl_days: 7,
        cleanup_interval_hours: 6,
        port: 0,
        docker_bin: "docker".into(),
    });

    let tracker = Arc::new(FileTracker::open(&config.deployments_db).unwrap());
    let deployer = Arc::new(FakeDeployer {
        tracker: tracker.clone(),
    });
    let proxy = Arc::new(ProxyManager::new(
        config.nginx_config_dir.clone(),
        Arc::new(NoopReload),
    ));
    let ctx = Arc::new(AppContext::new(
        config,
        tracker.clone(),
        deployer,
        proxy,
        Arc::new(QuietForge),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = rest::build_router(ctx);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Server {
        _dir: dir,
        addr,
        tracker,
        http: reqwest::Client::new(),
    }
}

fn webhook_body(action: &str, pr: u64, sha: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "action": action,
        "pull_request": {
            "number": pr,
            "head": { "ref": "feature/widgets", "sha": sha }
        },
        "repository": {
            "full_name": "acme/api",
            "name": "api",
            "clone_url": "https://github.com/acme/api.git",
            "owner": { "login": "acme" }
        }
    }))
    .unwrap()
}

async fn post_webhook(server: &Server, body: &[u8], header: &str) -> reqwest::Response {
    server
        .http
        .post(server.url("/webhook/github"))
        .header("X-Hub-Signature-256", header)
        .header("Content-Type", "application/json")
        .body(body.to_vec())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let server = start_server().await;
    let body: serde_json::Value = server
        .http
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn signed_webhook_deploys() {
    let server = start_server().await;
    let body = webhook_body("opened", 42, "abc123");
    let resp = post_webhook(&server, &body, &signature::sign(SECRET, &body)).await;

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");

    let list: serde_json::Value = server
        .http
        .get(server.url("/api/previews"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let deployments = list["deployments"].as_array().unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0]["deploymentId"], "acme-api-42");
    assert_eq!(deployments[0]["exposedAppPort"], 8000);
    assert_eq!(deployments[0]["status"], "running");
}

#[tokio::test]
async fn bad_signature_is_rejected_with_no_side_effects() {
    let server = start_server().await;
    let body = webhook_body("opened", 42, "abc123");
    let zeros = format!("sha256={}", "0".repeat(64));

    let resp = post_webhook(&server, &body, &zeros).await;
    assert_eq!(resp.status(), 401);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "Invalid signature");

    assert!(server.tracker.get_all_deployments().is_empty());
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let server = start_server().await;
    let body = webhook_body("opened", 42, "abc123");
    let resp = server
        .http
        .post(server.url("/webhook/github"))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn disallowed_repo_returns_500() {
    let server = start_server().await;
    let body = serde_json::to_vec(&serde_json::json!({
        "action": "opened",
        "pull_request": { "number": 1, "head": { "ref": "main", "sha": "aaa" } },
        "repository": {
            "full_name": "evil/impostor",
            "name": "impostor",
            "clone_url": "https://github.com/evil/impostor.git",
            "owner": { "login": "evil" }
        }
    }))
    .unwrap();

    let resp = post_webhook(&server, &body, &signature::sign(SECRET, &body)).await;
    assert_eq!(resp.status(), 500);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("allowed repositories"));
}

#[tokio::test]
async fn delete_unknown_preview_is_404() {
    let server = start_server().await;
    let resp = server
        .http
        .delete(server.url("/api/previews/ghost-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn delete_removes_deployment() {
    let server = start_server().await;
    let body = webhook_body("opened", 42, "abc123");
    post_webhook(&server, &body, &signature::sign(SECRET, &body)).await;

    let resp = server
        .http
        .delete(server.url("/api/previews/acme-api-42"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.tracker.get_deployment("acme-api-42").is_none());
}

#[tokio::test]
async fn get_single_preview_includes_container_status() {
    let server = start_server().await;
    let body = webhook_body("opened", 42, "abc123");
    post_webhook(&server, &body, &signature::sign(SECRET, &body)).await;

    let json: serde_json::Value = server
        .http
        .get(server.url("/api/previews/acme-api-42"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["deployment"]["deploymentId"], "acme-api-42");
    assert_eq!(json["containerStatus"], "running");
}

#[tokio::test]
async fn openapi_spec_is_served() {
    let server = start_server().await;
    let json: serde_json::Value = server
        .http
        .get(server.url("/openapi.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["openapi"], "3.1.0");
    assert!(json["paths"]["/webhook/github"]["post"].is_object());

    let docs = server
        .http
        .get(server.url("/api-docs"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(docs.contains("swagger-ui"));
}
