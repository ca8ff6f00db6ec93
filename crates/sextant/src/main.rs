//! Sextant CLI binary.

use anyhow::Result;
use sextant::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Main entry point for the sextant CLI.
///
/// Logs go to stderr so they never mix with query results on stdout.
#[tokio::main]
async fn main() -> Result<()> {
    // Example: RUST_LOG=sextant=debug,sextant_protocol=trace sextant status
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sextant=info,sextant_protocol=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!("Starting sextant CLI");

    let cli = Cli::parse_args();
    cli.execute().await?;

    tracing::debug!("Sextant CLI completed successfully");
    Ok(())
}
