use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DistributeError;
use crate::retry::RetryPolicy;

/// Upper bound for concurrent chunk requests within one file.
pub const MAX_CHUNK_CONCURRENCY: usize = 4;

/// Everything the orchestrator needs to know besides the artifact paths.
/// Passed explicitly into [`crate::orchestrator::ReleaseOrchestrator::new`];
/// nothing is read from the process environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributeConfig {
    pub continue_if_symbols_not_found: bool,
    pub symbols_type: Option<SymbolsType>,
    pub release_notes: String,
    /// Destination group ids; each must be a UUID.
    pub destinations: Vec<String>,
    pub deployment_name: String,
    pub commit_mode: CommitMode,
    pub source_type: String,
    pub version: Option<String>,
    pub runtime_version: Option<String>,
    /// Directory suffixes that mark a bundle. Defaults per symbols type.
    pub bundle_suffixes: Option<Vec<String>>,
    pub upload: UploadOptions,
    pub poll: PollOptions,
}

impl Default for DistributeConfig {
    fn default() -> Self {
        Self {
            continue_if_symbols_not_found: false,
            symbols_type: None,
            release_notes: String::new(),
            destinations: Vec::new(),
            deployment_name: "default".to_string(),
            commit_mode: CommitMode::Create,
            source_type: "Binary".to_string(),
            version: None,
            runtime_version: None,
            bundle_suffixes: None,
            upload: UploadOptions::default(),
            poll: PollOptions::default(),
        }
    }
}

impl DistributeConfig {
    pub fn validate(&self) -> Result<(), DistributeError> {
        for id in &self.destinations {
            uuid::Uuid::parse_str(id).map_err(|e| {
                DistributeError::InvalidConfig(format!("destination `{id}` is not a UUID: {e}"))
            })?;
        }
        if self.deployment_name.trim().is_empty() {
            return Err(DistributeError::InvalidConfig(
                "deployment_name must not be empty".into(),
            ));
        }
        if self.upload.max_concurrency == 0 {
            return Err(DistributeError::InvalidConfig(
                "upload.max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn bundle_suffixes(&self) -> Vec<String> {
        match &self.bundle_suffixes {
            Some(suffixes) => suffixes.clone(),
            None => self
                .symbols_type
                .map(|t| t.default_bundle_suffixes())
                .unwrap_or_default(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            symbols_type = ?self.symbols_type,
            continue_if_symbols_not_found = self.continue_if_symbols_not_found,
            destinations = self.destinations.len(),
            commit_mode = ?self.commit_mode,
            "Loaded DistributeConfig"
        );
        debug!(?self, "DistributeConfig loaded (full debug)");
    }
}

/// Kind of debug symbols attached to a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SymbolsType {
    Apple,
    AndroidJava,
    #[serde(rename = "UWP")]
    Uwp,
    Breakpad,
}

impl SymbolsType {
    /// Wire name used in the symbol upload request.
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolsType::Apple => "Apple",
            SymbolsType::AndroidJava => "AndroidJava",
            SymbolsType::Uwp => "UWP",
            SymbolsType::Breakpad => "Breakpad",
        }
    }

    pub fn default_bundle_suffixes(&self) -> Vec<String> {
        match self {
            SymbolsType::Apple => vec![".dsym".to_string()],
            SymbolsType::AndroidJava | SymbolsType::Uwp | SymbolsType::Breakpad => Vec::new(),
        }
    }
}

/// Whether the commit creates a fresh resource or updates an existing one.
/// The two are acknowledged with different status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    Create,
    Update,
}

impl CommitMode {
    pub fn expected_status(&self) -> u16 {
        match self {
            CommitMode::Create => 201,
            CommitMode::Update => 202,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_concurrency: MAX_CHUNK_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl UploadOptions {
    /// Requested concurrency clamped to `1..=MAX_CHUNK_CONCURRENCY`.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CHUNK_CONCURRENCY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollOptions {
    pub interval_ms: u64,
    /// Overall budget for one async operation.
    pub timeout_secs: u64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval_ms: 1500,
            timeout_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_mode_status_codes() {
        assert_eq!(CommitMode::Create.expected_status(), 201);
        assert_eq!(CommitMode::Update.expected_status(), 202);
    }

    #[test]
    fn apple_symbols_default_to_dsym_bundles() {
        let config = DistributeConfig {
            symbols_type: Some(SymbolsType::Apple),
            ..DistributeConfig::default()
        };
        assert_eq!(config.bundle_suffixes(), vec![".dsym".to_string()]);

        let overridden = DistributeConfig {
            bundle_suffixes: Some(vec![".xcarchive".into()]),
            ..config
        };
        assert_eq!(overridden.bundle_suffixes(), vec![".xcarchive".to_string()]);
    }

    #[test]
    fn validate_rejects_non_uuid_destination() {
        let config = DistributeConfig {
            destinations: vec!["testers".into()],
            ..DistributeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DistributeError::InvalidConfig(_))
        ));

        let ok = DistributeConfig {
            destinations: vec!["00000000-0000-0000-0000-000000000000".into()],
            ..DistributeConfig::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn concurrency_is_clamped() {
        let opts = UploadOptions {
            max_concurrency: 32,
            ..UploadOptions::default()
        };
        assert_eq!(opts.concurrency(), MAX_CHUNK_CONCURRENCY);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: DistributeConfig = serde_json::from_value(serde_json::json!({
            "symbols_type": "UWP",
            "commit_mode": "update",
            "upload": { "retry": { "max_attempts": 5 } }
        }))
        .expect("valid config");
        assert_eq!(config.symbols_type, Some(SymbolsType::Uwp));
        assert_eq!(config.commit_mode, CommitMode::Update);
        assert_eq!(config.upload.retry.max_attempts, 5);
        assert_eq!(config.upload.retry.base_delay_ms, 500);
        assert_eq!(config.poll.interval_ms, 1500);
        assert_eq!(config.deployment_name, "default");
    }
}
