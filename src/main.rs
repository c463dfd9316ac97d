mod logging;
mod parser;
mod privilege;
mod pwrstat;
mod server;
mod settings;
mod shutdown;
mod status;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::{
    pwrstat::Pwrstat, server::StatusServer, settings::Settings, shutdown::SystemShutdownSignal,
};

/// Serves `pwrstat -status` as JSON over HTTP.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// TOML file to read settings from.
    #[clap(long, value_parser, default_value = settings::DEFAULT_CONFIG)]
    config: PathBuf,

    #[clap(flatten)]
    overrides: settings::Overrides,

    /// Log at debug level.
    #[clap(short, long, value_parser)]
    verbose: bool,

    /// Log as JSON lines.
    #[clap(long, value_parser)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs)?;

    let settings = Settings::load(&cli.config, &cli.overrides)
        .with_context(|| format!("failed to read settings from {}", cli.config.display()))?;
    debug!(?settings, "loaded settings");

    // Keep root only for the moments pwrstat runs, not while serving HTTP.
    if !settings.noroot {
        privilege::drop_root()
            .context("pwrstat needs root; run as root, install setuid root, or pass --noroot")?;
    }

    let pwrstat = Pwrstat::new(&settings.path, !settings.noroot);
    info!(path = %pwrstat.path().display(), root = !settings.noroot, "using pwrstat");

    let address = settings.address();
    let server = StatusServer::bind(&address, pwrstat, settings.workers)?;
    match server.local_addr() {
        Some(addr) => info!(%addr, workers = settings.workers, "listening"),
        None => info!(%address, workers = settings.workers, "listening"),
    }

    server.run(SystemShutdownSignal)?;
    info!("server stopped");
    Ok(())
}
