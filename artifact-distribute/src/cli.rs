///
/// CLI interface for artifact-distribute: command parsing and the async `run`
/// entrypoint used by `main` and by integration tests.
///
/// All protocol and orchestration logic lives in [`artifact-distribute-core`];
/// this module only wires config, transport and orchestrator together.
///
/// [`artifact-distribute-core`]: ../../artifact-distribute-core/
use crate::load_config::load_config;
use anyhow::Result;
use artifact_distribute_core::orchestrator::{DeployRequest, ReleaseOrchestrator};
use artifact_distribute_core::transport::ReqwestTransport;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for artifact-distribute: upload a build and publish it as a release.
#[derive(Parser)]
#[clap(
    name = "artifact-distribute",
    version,
    about = "Upload release artifacts and symbol bundles to a distribution service"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload, commit and publish one artifact
    Deploy {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Glob naming exactly one artifact file
        #[clap(long)]
        app: String,
        /// Glob naming symbol files or bundles
        #[clap(long)]
        symbols: Option<String>,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Deploy { .. } => "deploy",
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!(command = cli.command.name(), "[CLI] Dispatching command");

    match cli.command {
        Commands::Deploy {
            config,
            app,
            symbols,
        } => {
            let config = load_config(config)?;
            config.release.trace_loaded();
            tracing::info!(command = "deploy", base_url = %config.service.base_url, "Starting deployment");

            let transport = ReqwestTransport::new()?;
            let mut orchestrator =
                ReleaseOrchestrator::new(&transport, config.service.base_url.as_str(), config.release)?;
            if let Some(token) = config.api_token {
                orchestrator = orchestrator.with_api_token(token);
            }

            let mut request = DeployRequest::new(app);
            if let Some(symbols) = symbols {
                request = request.with_symbols(symbols);
            }

            match orchestrator.deploy(&request).await {
                Ok(report) => {
                    tracing::info!(command = "deploy", ?report, "Deployment complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "deploy", error = %e, "Deployment failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
