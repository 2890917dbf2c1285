use anyhow::Result;
use artifact_distribute::cli::{run, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in CI.
    let dotenv = dotenvy::dotenv().ok();

    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    tracing::debug!(dotenv = ?dotenv, "[CLI] Logging ready");

    let cli = Cli::parse();
    run(cli).await.inspect_err(|e| {
        tracing::error!(error = %e, "[CLI] artifact-distribute failed");
    })
}
