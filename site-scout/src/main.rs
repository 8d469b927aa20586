use anyhow::Result;
use clap::Parser;
use site_scout_resilience::{DrainOutcome, ShutdownSignal};
use tracing::{error, info, warn};

mod commands;
mod config;
mod logging;
mod output;

use commands::{Cli, Runtime};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::AppConfig::load()?;
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    logging::init_logging(&config.log)?;

    let runtime = Runtime::new(config).await;

    // Drains in-flight collection on Ctrl-C, and releases shared components
    // once the command is done.
    let signal = ShutdownSignal::new();
    let drain = {
        let signal = signal.clone();
        let shutdown = runtime.resilience.shutdown.clone();
        tokio::spawn(async move {
            signal.wait().await;
            match shutdown.shutdown().await {
                Ok(DrainOutcome::Drained) => info!("Shutdown complete"),
                Ok(DrainOutcome::Forced { remaining }) => {
                    warn!(remaining, "Shutdown forced in-flight operations closed")
                }
                Err(e) => error!(error = %e, "Shutdown failed"),
            }
        })
    };

    let result = commands::execute(&runtime, cli.command).await;

    signal.trigger();
    if let Err(e) = drain.await {
        error!(error = %e, "Shutdown task failed");
    }

    result
}
