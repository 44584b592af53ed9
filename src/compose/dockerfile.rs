//! Dockerfile resolution.
//!
//! A repo-owned `Dockerfile` always wins. A lowercase `dockerfile` is copied
//! to `Dockerfile` so builds behave the same on case-sensitive filesystems.
//! Repos without either get a per-framework template.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::repo_config::{DbType, Framework};

const NESTJS_DOCKERFILE: &str = r#"
FROM node:20-alpine AS build
WORKDIR /app
COPY package*.json ./
RUN npm ci
COPY . .
RUN npm run build

FROM node:20-alpine
WORKDIR /app
ENV NODE_ENV=production
COPY --from=build /app/node_modules ./node_modules
COPY --from=build /app/dist ./dist
COPY --from=build /app/package*.json ./
EXPOSE {{app_port}}
CMD ["node", "{{entrypoint}}"]
"#;

const GO_DOCKERFILE: &str = r#"
FROM golang:1.23-alpine AS build
WORKDIR /app
COPY go.mod go.sum ./
RUN go mod download
COPY . .
RUN CGO_ENABLED=0 go build -o /out/{{entrypoint}} .

FROM alpine:3.20
WORKDIR /app
RUN apk add --no-cache ca-certificates
COPY --from=build /out/{{entrypoint}} ./{{entrypoint}}
EXPOSE {{app_port}}
CMD ["./{{entrypoint}}"]
"#;

const LARAVEL_DOCKERFILE: &str = r#"
FROM php:8.3-cli-alpine
WORKDIR /app
RUN apk add --no-cache libpq-dev $PHPIZE_DEPS \
    && docker-php-ext-install {{php_db_ext}}
COPY --from=composer:2 /usr/bin/composer /usr/bin/composer
COPY . .
RUN composer install --no-dev --optimize-autoloader
EXPOSE {{app_port}}
CMD ["php", "artisan", "serve", "--host=0.0.0.0", "--port={{app_port}}"]
"#;

const RUST_DOCKERFILE: &str = r#"
FROM rust:1.80-slim AS build
WORKDIR /app
COPY . .
RUN cargo build --release

FROM debian:bookworm-slim
WORKDIR /app
RUN apt-get update && apt-get install -y --no-install-recommends ca-certificates \
    && rm -rf /var/lib/apt/lists/*
COPY --from=build /app/target/release/{{entrypoint}} ./{{entrypoint}}
EXPOSE {{app_port}}
CMD ["./{{entrypoint}}"]
"#;

const PYTHON_DOCKERFILE: &str = r#"
FROM python:3.12-slim
WORKDIR /app
COPY requirements.txt ./
RUN pip install --no-cache-dir -r requirements.txt
COPY . .
EXPOSE {{app_port}}
CMD ["uvicorn", "{{entrypoint}}", "--host", "0.0.0.0", "--port", "{{app_port}}"]
"#;

/// Make sure `work_dir/Dockerfile` exists, generating one when the repo
/// doesn't ship its own. Returns true when a template was written.
pub fn ensure_dockerfile(
    work_dir: &Path,
    framework: Framework,
    db_type: DbType,
    app_port: u16,
    entrypoint: &str,
) -> Result<bool> {
    let canonical = work_dir.join("Dockerfile");
    if canonical.exists() {
        debug!("repo ships its own Dockerfile");
        return Ok(false);
    }

    let lowercase = work_dir.join("dockerfile");
    if lowercase.exists() {
        std::fs::copy(&lowercase, &canonical)
            .context("failed to copy lowercase dockerfile to Dockerfile")?;
        debug!("copied lowercase dockerfile to Dockerfile");
        return Ok(false);
    }

    let template = match framework {
        Framework::Nestjs => NESTJS_DOCKERFILE,
        Framework::Go => GO_DOCKERFILE,
        Framework::Laravel => LARAVEL_DOCKERFILE,
        Framework::Rust => RUST_DOCKERFILE,
        Framework::Python => PYTHON_DOCKERFILE,
    };
    let rendered = template
        .trim_start()
        .replace("{{app_port}}", &app_port.to_string())
        .replace("{{entrypoint}}", entrypoint)
        .replace("{{php_db_ext}}", php_db_extension(db_type));

    std::fs::write(&canonical, rendered).context("failed to write generated Dockerfile")?;
    debug!(framework = framework.as_str(), "generated Dockerfile from template");
    Ok(true)
}

fn php_db_extension(db: DbType) -> &'static str {
    match db {
        DbType::Postgres => "pdo_pgsql",
        DbType::Mysql => "pdo_mysql",
        // No bundled PHP extension; the mongodb driver comes via PECL in
        // repos that actually pair Laravel with MongoDB.
        DbType::Mongodb => "pdo_mysql",
    }
}
