/// `load_config` module: reads the static YAML deployment config and injects
/// the API token from the environment.
///
/// This is the only place where user-supplied YAML is parsed. The file carries
/// no secrets; the token comes from `DISTRIBUTE_API_TOKEN` (a `.env` file is
/// honoured by `main`).
///
/// # Accepted YAML
///
/// ```yaml
/// service:
///   base_url: https://api.example.com/v0.1/apps/owner/app
/// release_notes_file: notes.md   # relative to the config file
/// release:
///   destinations: ["00000000-0000-0000-0000-000000000001"]
///   symbols_type: Apple
///   continue_if_symbols_not_found: true
///   commit_mode: create
///   upload:
///     max_concurrency: 4
///   poll:
///     interval_ms: 1500
///     timeout_secs: 600
/// ```
///
/// # Errors
/// All errors are `anyhow::Error` and surface at the CLI boundary.
use anyhow::{anyhow, Context, Result};
use artifact_distribute_core::config::DistributeConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Environment variable holding the service API token.
pub const API_TOKEN_ENV: &str = "DISTRIBUTE_API_TOKEN";

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    pub base_url: String,
}

#[derive(Debug)]
pub struct CliConfig {
    pub service: ServiceSection,
    pub release: DistributeConfig,
    pub api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    service: ServiceSection,
    #[serde(default)]
    release_notes_file: Option<PathBuf>,
    #[serde(default)]
    release: DistributeConfig,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if raw.service.base_url.trim().is_empty() {
        return Err(anyhow!("service.base_url must not be empty"));
    }

    let mut release = raw.release;
    if let Some(notes_file) = raw.release_notes_file {
        if !release.release_notes.is_empty() {
            return Err(anyhow!(
                "release.release_notes and release_notes_file are mutually exclusive"
            ));
        }
        let notes_path = match path_ref.parent() {
            Some(dir) if notes_file.is_relative() => dir.join(&notes_file),
            _ => notes_file,
        };
        release.release_notes = fs::read_to_string(&notes_path)
            .with_context(|| format!("Failed to read release notes {:?}", notes_path))?;
        info!(notes_path = ?notes_path, bytes = release.release_notes.len(), "Release notes loaded");
    }

    release
        .validate()
        .map_err(|e| anyhow!("Invalid release configuration: {e}"))?;

    let api_token = std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty());
    if api_token.is_none() {
        warn!(env = API_TOKEN_ENV, "No API token in environment; requests are sent unauthenticated");
    }

    Ok(CliConfig {
        service: raw.service,
        release,
        api_token,
    })
}
