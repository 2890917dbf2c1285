//! Release orchestration: resolve → request → upload → commit → poll → publish.
//!
//! [`ReleaseOrchestrator::deploy`] drives one release through
//!
//! ```text
//! Requesting → Uploading → Committing → AwaitingAsyncOp → (Polling) → Published
//! ```
//!
//! with `Failed` reachable from every state. The visited states are returned
//! in the [`DeployReport`].
//!
//! # Policies worth knowing
//! - Artifact and symbol patterns are resolved before the first network call,
//!   so an ambiguous or missing artifact never touches the service.
//! - An async operation that outlives its deadline is logged as a warning and
//!   the release is still published. The server is expected to finish the
//!   commit on its own.
//! - Missing symbols are fatal unless `continue_if_symbols_not_found` is set,
//!   in which case the symbol stage is skipped and reported as
//!   [`SymbolsOutcome::SkippedOptional`].
//! - Groups are processed one at a time; nothing crosses group boundaries.

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::api::{
    CommitProperties, CommitRequest, DeploymentSettings, ServiceClient, SourceDescriptor, UploadedFile,
};
use crate::config::DistributeConfig;
use crate::contract::HttpTransport;
use crate::error::DistributeError;
use crate::model::{
    ArtifactGroup, DeployReport, OperationHandle, PollOutcome, PollResult, ReleaseState, SymbolsOutcome,
};
use crate::poller::OperationPoller;
use crate::resolver::FileSetResolver;
use crate::upload::ChunkedUploadClient;

/// What to deploy.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Must resolve to exactly one file.
    pub artifact_pattern: String,
    pub symbols_pattern: Option<String>,
    /// Deadline for async operation polling; defaults to now plus
    /// `poll.timeout_secs` when the caller does not own one.
    pub deadline: Option<Instant>,
}

impl DeployRequest {
    pub fn new(artifact_pattern: impl Into<String>) -> Self {
        Self {
            artifact_pattern: artifact_pattern.into(),
            symbols_pattern: None,
            deadline: None,
        }
    }

    pub fn with_symbols(mut self, pattern: impl Into<String>) -> Self {
        self.symbols_pattern = Some(pattern.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

enum SymbolPlan {
    NotRequested,
    Skipped,
    Groups(Vec<ArtifactGroup>),
}

pub struct ReleaseOrchestrator<'a, T: HttpTransport> {
    transport: &'a T,
    api: ServiceClient<'a, T>,
    config: DistributeConfig,
    resolver: FileSetResolver,
    api_token: Option<String>,
}

impl<'a, T: HttpTransport> ReleaseOrchestrator<'a, T> {
    pub fn new(
        transport: &'a T,
        base_url: impl Into<String>,
        config: DistributeConfig,
    ) -> Result<Self, DistributeError> {
        config.validate()?;
        let resolver = FileSetResolver::new(config.bundle_suffixes());
        Ok(Self {
            transport,
            api: ServiceClient::new(transport, base_url),
            config,
            resolver,
            api_token: None,
        })
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.api = self.api.with_api_token(token.clone());
        self.api_token = Some(token);
        self
    }

    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeployReport, DistributeError> {
        info!(
            artifact = %request.artifact_pattern,
            symbols = request.symbols_pattern.as_deref().unwrap_or(""),
            "[DEPLOY] Starting deployment"
        );

        let artifact = self.resolver.resolve_single(&request.artifact_pattern)?;
        let symbols = self.plan_symbols(request.symbols_pattern.as_deref())?;

        let mut states = Vec::new();
        let deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + std::time::Duration::from_secs(self.config.poll.timeout_secs));

        match self.run_lifecycle(&artifact, symbols, deadline, &mut states).await {
            Ok(report) => {
                info!(
                    release_id = %report.release_id,
                    poll = ?report.poll,
                    symbols = ?report.symbols,
                    "[DEPLOY] Deployment complete"
                );
                Ok(report)
            }
            Err(e) => {
                enter(&mut states, ReleaseState::Failed);
                error!(error = %e, ?states, "[DEPLOY][ERROR] Deployment failed");
                Err(e)
            }
        }
    }

    fn plan_symbols(&self, pattern: Option<&str>) -> Result<SymbolPlan, DistributeError> {
        let Some(pattern) = pattern else {
            return Ok(SymbolPlan::NotRequested);
        };
        if self.config.symbols_type.is_none() {
            return Err(DistributeError::InvalidConfig(
                "a symbols pattern was given but symbols_type is not set".into(),
            ));
        }

        let groups = self.resolver.resolve(pattern)?;
        if !groups.is_empty() {
            return Ok(SymbolPlan::Groups(groups));
        }
        if self.config.continue_if_symbols_not_found {
            warn!(pattern, "[DEPLOY][SYMBOLS] No symbol files found, continuing without symbols");
            return Ok(SymbolPlan::Skipped);
        }
        Err(DistributeError::ArtifactNotFound {
            pattern: pattern.to_string(),
        })
    }

    async fn run_lifecycle(
        &self,
        artifact: &ArtifactGroup,
        symbols: SymbolPlan,
        deadline: Instant,
        states: &mut Vec<ReleaseState>,
    ) -> Result<DeployReport, DistributeError> {
        enter(states, ReleaseState::Requesting);
        let target = self.api.get_upload_target().await?;
        let mut sessions = Vec::with_capacity(artifact.files.len());
        for file in &artifact.files {
            let resource = self.api.create_upload(file, &target.relative_path).await?;
            let session = self.api.open_session(&resource, file).await?;
            sessions.push((file, session));
        }

        enter(states, ReleaseState::Uploading);
        let uploader = ChunkedUploadClient::new(self.transport, &self.config.upload);
        let mut uploads = Vec::with_capacity(sessions.len());
        for (file, session) in &sessions {
            uploader.upload(session, file).await?;
            uploads.push(UploadedFile {
                path: file.relative_path.clone(),
                upload_id: session.session_id().to_string(),
            });
        }

        enter(states, ReleaseState::Committing);
        let body = CommitRequest {
            properties: CommitProperties {
                source: SourceDescriptor {
                    relative_path: target.relative_path.clone(),
                    source_type: self.config.source_type.clone(),
                    version: self.config.version.clone(),
                    uploads,
                },
                deployment_settings: DeploymentSettings {
                    runtime_version: self.config.runtime_version.clone(),
                },
            },
        };
        let commit = self
            .api
            .commit(&self.config.deployment_name, self.config.commit_mode, &body)
            .await?;
        let release_id = commit
            .release_id
            .clone()
            .or_else(|| sessions.first().map(|(_, s)| s.session_id().to_string()))
            .unwrap_or_else(|| artifact.group_id.clone());

        enter(states, ReleaseState::AwaitingAsyncOp);
        let poll = match commit.async_operation {
            Some(status_url) => {
                enter(states, ReleaseState::Polling);
                self.await_operation(status_url, deadline).await?
            }
            None => PollOutcome::NotRequired,
        };

        let symbols = match symbols {
            SymbolPlan::NotRequested => SymbolsOutcome::NotRequested,
            SymbolPlan::Skipped => SymbolsOutcome::SkippedOptional,
            SymbolPlan::Groups(groups) => self.upload_symbols(&groups).await?,
        };

        enter(states, ReleaseState::Published);
        self.api
            .make_available(&release_id, &self.config.destinations, &self.config.release_notes)
            .await?;

        Ok(DeployReport {
            release_id,
            states: states.clone(),
            poll,
            symbols,
        })
    }

    async fn await_operation(&self, status_url: String, deadline: Instant) -> Result<PollOutcome, DistributeError> {
        let handle = OperationHandle::new(status_url, deadline)
            .with_poll_interval(std::time::Duration::from_millis(self.config.poll.interval_ms));
        let poller = OperationPoller::new(self.transport).with_api_token(self.api_token.clone());

        match poller.await_completion(&handle).await? {
            PollResult::Succeeded => Ok(PollOutcome::Succeeded),
            PollResult::TimedOut => {
                warn!(
                    status_url = %handle.status_url,
                    "[DEPLOY][POLL] Operation did not finish before the deadline; publishing anyway"
                );
                Ok(PollOutcome::TimedOut)
            }
            PollResult::Failed { status, message } => Err(DistributeError::OperationFailed {
                status_url: handle.status_url,
                status,
                message,
            }),
        }
    }

    async fn upload_symbols(&self, groups: &[ArtifactGroup]) -> Result<SymbolsOutcome, DistributeError> {
        let symbol_type = self
            .config
            .symbols_type
            .ok_or_else(|| DistributeError::InvalidConfig("symbols_type is not set".into()))?;

        let mut files = 0;
        for group in groups {
            info!(
                group = %group.group_id,
                files = group.files.len(),
                bytes = group.total_bytes,
                "[DEPLOY][SYMBOLS] Uploading symbol group"
            );
            let upload = self.api.begin_symbol_upload(symbol_type.as_str()).await?;
            for file in &group.files {
                self.api
                    .put_symbol_blob(&upload, file, &self.config.upload.retry)
                    .await?;
                files += 1;
            }
            self.api.commit_symbol_upload(&upload).await?;
        }

        Ok(SymbolsOutcome::Uploaded {
            groups: groups.len(),
            files,
        })
    }
}

fn enter(states: &mut Vec<ReleaseState>, state: ReleaseState) {
    info!(?state, "[DEPLOY] State transition");
    states.push(state);
}
