// rest/routes/previews.rs — list, inspect, and manually remove previews.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::tracker::DeploymentStatus;
use crate::AppContext;

pub async fn list(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let deployments = ctx.tracker.get_all_deployments();
    info!(count = deployments.len(), "listing deployments");
    Json(json!({ "deployments": deployments }))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(deployment) = ctx.tracker.get_deployment(&deployment_id) else {
        return Err(not_found(&deployment_id));
    };

    // Live container state beats whatever the store last recorded.
    let container_status = ctx
        .deployer
        .get_preview_status(&deployment_id)
        .await
        .unwrap_or(DeploymentStatus::Stopped);

    Ok(Json(json!({
        "deployment": deployment,
        "containerStatus": container_status.as_str(),
    })))
}

pub async fn remove(
    State(ctx): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let deployment_id = deployment_id.trim().to_string();
    if deployment_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "deploymentId is required" })),
        ));
    }

    let Some(deployment) = ctx.tracker.get_deployment(&deployment_id) else {
        return Err(not_found(&deployment_id));
    };

    info!(deployment_id, "manual preview removal requested");
    let _guard = ctx.locks.acquire(&deployment_id).await;

    let result: anyhow::Result<()> = async {
        ctx.deployer.cleanup_preview(&deployment_id).await?;
        ctx.proxy
            .remove_preview(&deployment.project_slug, deployment.pr_number)
            .await?;
        ctx.tracker.delete_deployment(&deployment_id)?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => Ok(Json(json!({ "status": "ok", "deploymentId": deployment_id }))),
        Err(e) => {
            warn!(deployment_id, err = %format!("{e:#}"), "manual removal failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{e:#}") })),
            ))
        }
    }
}

fn not_found(deployment_id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no deployment '{deployment_id}'") })),
    )
}
