use anyhow::Result;
use clap::Parser;
use previewd::{
    config::OrchestratorConfig, containers::ContainerManager, forge::GithubClient,
    proxy::{NginxReload, ProxyManager}, reconciler, rest, tracker::FileTracker, AppContext,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "previewd",
    about = "Per-PR preview environment orchestrator",
    version
)]
struct Args {
    /// Log level / filter (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log)
        .compact()
        .init();

    let config = match OrchestratorConfig::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        deployments_dir = %config.deployments_dir.display(),
        "previewd starting"
    );

    let tracker = Arc::new(FileTracker::open(&config.deployments_db)?);
    let deployer = Arc::new(ContainerManager::new(
        config.deployments_dir.clone(),
        config.preview_base_url.clone(),
        config.docker_bin.clone(),
        tracker.clone(),
    )?);
    let proxy = Arc::new(ProxyManager::new(
        config.nginx_config_dir.clone(),
        Arc::new(NginxReload),
    ));
    let forge = Arc::new(GithubClient::new(config.github_token.clone())?);

    let ctx = Arc::new(AppContext::new(
        config.clone(),
        tracker,
        deployer,
        proxy,
        forge,
    ));

    let reconciler_handle = reconciler::spawn(ctx.reconciler(), config.cleanup_interval_hours);

    // On SIGTERM/SIGINT: stop the reconciler first so it starts no new
    // work, then let axum drain in-flight requests.
    let shutdown = async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        reconciler_handle.stop().await;
    };

    rest::serve(ctx, shutdown).await?;
    info!("previewd stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
