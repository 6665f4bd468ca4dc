mod cli;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use vidsift::fetch::{self, TransportConfig};
use vidsift::{roster, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Roster { survey } => {
            let added = roster::build_roster(survey, &cli.roster)?;
            println!("Roster ready ({added} new entries).");
        }
        Commands::Mirror => mirror(&cli).await?,
        Commands::Harvest => harvest(&cli).await?,
        Commands::Run => {
            mirror(&cli).await?;
            harvest(&cli).await?;
        }
    }
    Ok(())
}

async fn mirror(cli: &Cli) -> Result<()> {
    let targets = roster::load_roster(&cli.roster)?;
    // The TLS relaxation flag only ever applies to this one client.
    let transport = TransportConfig {
        timeout: Duration::from_secs(cli.timeout),
        accept_invalid_certs: cli.insecure,
    };
    let client = transport.client()?;
    let (fetched, present, failed) =
        fetch::mirror_all(&client, &targets, &cli.out, cli.concurrency).await;
    println!("Mirrored {fetched} pages ({present} already present, {failed} failed).");
    Ok(())
}

async fn harvest(cli: &Cli) -> Result<()> {
    let targets = roster::load_roster(&cli.roster)?;
    let transport = TransportConfig {
        timeout: Duration::from_secs(cli.timeout),
        ..TransportConfig::default()
    };
    let pipeline = Pipeline::new(&cli.out, &transport)?.with_concurrency(cli.concurrency);
    let summary = pipeline.run(&targets).await;
    println!(
        "Run complete: {} downloaded, {} partial, {} skipped, {} pending, {} failed.",
        summary.downloaded,
        summary.partially_downloaded,
        summary.skipped,
        summary.pending,
        summary.failed
    );
    Ok(())
}
