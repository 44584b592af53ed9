//! Framework detection for repos that don't pin one in their config.
//!
//! Detectors run in a fixed order and the first hit wins. Rust and Python
//! have no heuristic — those repos must set `framework` explicitly.

use std::path::Path;

use tracing::debug;

use super::{Framework, RepoPreviewConfig};

/// Config override wins; otherwise the first matching detector; otherwise
/// NestJS.
pub fn resolve_framework(work_dir: &Path, config: &RepoPreviewConfig) -> Framework {
    if let Some(framework) = config.framework {
        return framework;
    }

    let detected = detect(work_dir);
    match detected {
        Some(f) => {
            debug!(framework = f.as_str(), "framework detected from repo contents");
            f
        }
        None => {
            debug!("no framework detected — defaulting to nestjs");
            Framework::Nestjs
        }
    }
}

fn detect(work_dir: &Path) -> Option<Framework> {
    if is_nestjs(work_dir) {
        return Some(Framework::Nestjs);
    }
    if work_dir.join("go.mod").exists() {
        return Some(Framework::Go);
    }
    if is_laravel(work_dir) {
        return Some(Framework::Laravel);
    }
    None
}

fn is_nestjs(work_dir: &Path) -> bool {
    if work_dir.join("nest-cli.json").exists() {
        return true;
    }
    json_has_dependency(
        &work_dir.join("package.json"),
        &["dependencies", "devDependencies"],
        "@nestjs/core",
    )
}

fn is_laravel(work_dir: &Path) -> bool {
    json_has_dependency(
        &work_dir.join("composer.json"),
        &["require", "require-dev"],
        "laravel/framework",
    )
}

/// True when any of `sections` in the JSON file at `path` contains `package`
/// as a key. Unreadable or malformed files count as "no".
fn json_has_dependency(path: &Path, sections: &[&str], package: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    sections
        .iter()
        .any(|section| json.get(section).and_then(|deps| deps.get(package)).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_config;

    fn config_without_framework() -> RepoPreviewConfig {
        repo_config::parse(
            r#"
database: postgres
health_check_path: /health
app_port: 3000
app_port_env: PORT
app_entrypoint: dist/main.js
"#,
        )
        .unwrap()
    }

    #[test]
    fn config_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();

        let mut config = config_without_framework();
        config.framework = Some(Framework::Rust);
        assert_eq!(resolve_framework(dir.path(), &config), Framework::Rust);
    }

    #[test]
    fn nest_cli_json_detects_nestjs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nest-cli.json"), "{}").unwrap();
        assert_eq!(
            resolve_framework(dir.path(), &config_without_framework()),
            Framework::Nestjs
        );
    }

    #[test]
    fn package_json_dependency_detects_nestjs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"devDependencies": {"@nestjs/core": "^10.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(
            resolve_framework(dir.path(), &config_without_framework()),
            Framework::Nestjs
        );
    }

    #[test]
    fn go_mod_detects_go() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();
        assert_eq!(
            resolve_framework(dir.path(), &config_without_framework()),
            Framework::Go
        );
    }

    #[test]
    fn composer_require_detects_laravel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("composer.json"),
            r#"{"require": {"laravel/framework": "^11.0"}}"#,
        )
        .unwrap();
        assert_eq!(
            resolve_framework(dir.path(), &config_without_framework()),
            Framework::Laravel
        );
    }

    #[test]
    fn nestjs_detector_runs_before_go() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nest-cli.json"), "{}").unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();
        assert_eq!(
            resolve_framework(dir.path(), &config_without_framework()),
            Framework::Nestjs
        );
    }

    #[test]
    fn empty_repo_defaults_to_nestjs() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_framework(dir.path(), &config_without_framework()),
            Framework::Nestjs
        );
    }
}
