// rest/openapi.rs — OpenAPI 3.1 spec + the interactive doc page.

use axum::{extract::State, response::Html, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::AppContext;

pub async fn openapi_spec(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "openapi": "3.1.0",
        "info": {
            "title": "previewd API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Per-PR preview environment orchestrator. Webhook-driven; the REST surface covers health, listing, and manual teardown."
        },
        "servers": [
            { "url": format!("http://localhost:{}", ctx.config.port), "description": "Orchestrator host" }
        ],
        "components": {
            "schemas": {
                "Deployment": {
                    "type": "object",
                    "properties": {
                        "prNumber": { "type": "integer" },
                        "repoOwner": { "type": "string" },
                        "repoName": { "type": "string" },
                        "projectSlug": { "type": "string" },
                        "deploymentId": { "type": "string" },
                        "branch": { "type": "string" },
                        "commitSha": { "type": "string" },
                        "cloneUrl": { "type": "string" },
                        "framework": { "type": "string", "enum": ["nestjs", "go", "laravel", "rust", "python"] },
                        "dbType": { "type": "string", "enum": ["postgres", "mysql", "mongodb"] },
                        "appPort": { "type": "integer" },
                        "exposedAppPort": { "type": "integer" },
                        "exposedDbPort": { "type": "integer" },
                        "status": { "type": "string", "enum": ["building", "running", "failed", "stopped"] },
                        "createdAt": { "type": "string", "format": "date-time" },
                        "updatedAt": { "type": "string", "format": "date-time" },
                        "url": { "type": "string" },
                        "commentId": { "type": "integer" }
                    }
                }
            }
        },
        "paths": {
            "/health": {
                "get": {
                    "operationId": "getHealth",
                    "summary": "Liveness and uptime",
                    "responses": { "200": { "description": "Daemon is healthy" } }
                }
            },
            "/webhook/github": {
                "post": {
                    "operationId": "receiveWebhook",
                    "summary": "GitHub pull_request webhook sink",
                    "parameters": [{
                        "name": "X-Hub-Signature-256",
                        "in": "header",
                        "required": true,
                        "schema": { "type": "string" },
                        "description": "sha256=<hex> HMAC of the raw body"
                    }],
                    "responses": {
                        "200": { "description": "Event handled" },
                        "401": { "description": "Invalid signature" },
                        "500": { "description": "Handler failure" }
                    }
                }
            },
            "/api/previews": {
                "get": {
                    "operationId": "listPreviews",
                    "summary": "List all tracked deployments",
                    "responses": { "200": { "description": "Deployment list" } }
                }
            },
            "/api/previews/{deploymentId}": {
                "get": {
                    "operationId": "getPreview",
                    "summary": "One deployment with live container status",
                    "parameters": [{ "name": "deploymentId", "in": "path", "required": true, "schema": { "type": "string" } }],
                    "responses": {
                        "200": { "description": "Deployment details" },
                        "404": { "description": "Unknown deployment" }
                    }
                },
                "delete": {
                    "operationId": "deletePreview",
                    "summary": "Manually tear a preview down",
                    "parameters": [{ "name": "deploymentId", "in": "path", "required": true, "schema": { "type": "string" } }],
                    "responses": {
                        "200": { "description": "Preview removed" },
                        "400": { "description": "Missing deployment id" },
                        "404": { "description": "Unknown deployment" },
                        "500": { "description": "Teardown failure" }
                    }
                }
            }
        }
    }))
}

pub async fn api_docs() -> Html<&'static str> {
    Html(API_DOCS_HTML)
}

const API_DOCS_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>previewd API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
    };
  </script>
</body>
</html>
"##;
