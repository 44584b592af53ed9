pub mod compose;
pub mod config;
pub mod containers;
pub mod errors;
pub mod forge;
pub mod locks;
pub mod proxy;
pub mod reconciler;
pub mod repo_config;
pub mod rest;
pub mod slug;
pub mod tracker;
pub mod webhook;

use std::sync::Arc;

use config::OrchestratorConfig;
use containers::PreviewDeployer;
use forge::ForgeClient;
use locks::DeploymentLocks;
use proxy::ProxyManager;
use tracker::DeploymentTracker;
use webhook::WebhookHandler;

/// Shared application state passed to every HTTP handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<OrchestratorConfig>,
    pub tracker: Arc<dyn DeploymentTracker>,
    pub deployer: Arc<dyn PreviewDeployer>,
    pub proxy: Arc<ProxyManager>,
    pub forge: Arc<dyn ForgeClient>,
    /// Per-deployment critical sections shared by webhook, REST delete,
    /// and the reconciler.
    pub locks: Arc<DeploymentLocks>,
    pub webhook: Arc<WebhookHandler>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire the standard component graph over the given capability
    /// implementations.
    pub fn new(
        config: Arc<OrchestratorConfig>,
        tracker: Arc<dyn DeploymentTracker>,
        deployer: Arc<dyn PreviewDeployer>,
        proxy: Arc<ProxyManager>,
        forge: Arc<dyn ForgeClient>,
    ) -> Self {
        let locks = Arc::new(DeploymentLocks::new());
        let webhook = Arc::new(WebhookHandler::new(
            config.clone(),
            tracker.clone(),
            deployer.clone(),
            proxy.clone(),
            forge.clone(),
            locks.clone(),
        ));
        Self {
            config,
            tracker,
            deployer,
            proxy,
            forge,
            locks,
            webhook,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn reconciler(&self) -> Arc<reconciler::Reconciler> {
        Arc::new(reconciler::Reconciler::new(
            self.tracker.clone(),
            self.forge.clone(),
            self.deployer.clone(),
            self.proxy.clone(),
            self.locks.clone(),
            self.config.cleanup_ttl_days,
        ))
    }
}
