use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use super::{CaptureArgs, Runtime};
use crate::output;

#[derive(Debug, Args)]
pub struct CollectArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,
}

pub async fn execute(runtime: &Runtime, args: CollectArgs) -> Result<()> {
    let collector = runtime.collector()?;
    let config = args.capture.collector_config();

    info!(target_url = %args.capture.target, "Collecting");
    let result = collector
        .collect_all(&args.capture.target, &config)
        .await
        .with_context(|| format!("Collection of '{}' failed", args.capture.target))?;

    if args.capture.json {
        output::print_json(&result)
    } else {
        output::print_collection(&result);
        Ok(())
    }
}
