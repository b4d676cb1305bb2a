//! tunefetch - Fetch songs from remote catalogs into a self-hosted music library

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod cli;
mod config;
mod downloads;
mod matcher;
mod utils;

use cli::{Cli, Commands};
use config::Settings;
use utils::ConditionalStderrLayer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tunefetch=debug,reqwest=debug"
    } else {
        "tunefetch=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(ConditionalStderrLayer::new(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        ))
        .init();

    if let Commands::Completion { shell } = cli.command {
        cli::commands::completion(shell);
        return Ok(());
    }

    let settings = Settings::load()?.with_overrides(cli.server, cli.session);

    match cli.command {
        Commands::Search {
            keywords,
            limit,
            select,
            opts,
        } => {
            cli::commands::search(&settings, keywords, limit, select, opts).await?;
        }
        Commands::Download {
            queries,
            force,
            opts,
        } => {
            cli::commands::download(&settings, queries, force, opts).await?;
        }
        Commands::Import {
            name,
            queries,
            link,
            opts,
        } => {
            cli::commands::import(&settings, name, queries, link, opts).await?;
        }
        Commands::Library { filter } => {
            cli::commands::library(&settings, filter).await?;
        }
        Commands::Completion { .. } => {}
    }

    Ok(())
}
