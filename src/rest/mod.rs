// rest/mod.rs — HTTP surface of the orchestrator.
//
// Routes:
//   GET    /health
//   POST   /webhook/github
//   GET    /api/previews
//   GET    /api/previews/:deployment_id
//   DELETE /api/previews/:deployment_id
//   GET    /openapi.json
//   GET    /api-docs

pub mod openapi;
pub mod routes;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppContext;

/// Webhook payloads top out well under this; anything larger is noise.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/webhook/github", post(routes::webhook::receive))
        .route("/api/previews", get(routes::previews::list))
        .route(
            "/api/previews/:deployment_id",
            get(routes::previews::get).delete(routes::previews::remove),
        )
        .route("/openapi.json", get(openapi::openapi_spec))
        .route("/api-docs", get(openapi::api_docs))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve until `shutdown` resolves; in-flight requests are allowed to
/// finish.
pub async fn serve(ctx: Arc<AppContext>, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], ctx.config.port).into();
    let router = build_router(ctx);

    info!("orchestrator API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
