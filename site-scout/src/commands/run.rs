use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::{json, Value};
use site_scout_collector::{AnalysisJob, PhaseHandler, PhaseInput};
use site_scout_core::{CheckpointPhase, CheckpointRepository, RunId};
use site_scout_resilience::{GracefulShutdown, ShutdownError};
use site_scout_storage::{
    postgres::{create_pool, health_check, migrate, PostgresConfig},
    CheckpointStore, FileCheckpointRepository, PgCheckpointRepository,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::{CaptureArgs, Runtime};
use crate::output;

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    /// Resume or start this run; a new id is generated when omitted
    #[arg(long)]
    pub run_id: Option<RunId>,
}

pub async fn execute(runtime: &Runtime, args: RunArgs) -> Result<()> {
    let run_id = args.run_id.unwrap_or_default();
    let store = checkpoint_store(runtime).await?;
    let collector = Arc::new(runtime.collector()?);

    let job = AnalysisJob::new(collector, store).with_handler(Arc::new(CollectionSummary));

    info!(run_id = %run_id, target_url = %args.capture.target, "Running analysis job");
    let report = job
        .run(run_id, &args.capture.target, &args.capture.collector_config())
        .await
        .with_context(|| format!("Run {} failed", run_id))?;

    if args.capture.json {
        output::print_json(&report)
    } else {
        output::print_job(&report);
        Ok(())
    }
}

/// PostgreSQL when a database URL is configured, the checkpoint directory
/// otherwise.
async fn checkpoint_store(runtime: &Runtime) -> Result<CheckpointStore> {
    let section = &runtime.config.checkpoint;

    let repository: Arc<dyn CheckpointRepository> = match &section.database_url {
        Some(url) => {
            let pool = create_pool(&PostgresConfig::new(url.clone()))
                .await
                .context("Failed to connect to the checkpoint database")?;
            health_check(&pool).await?;
            migrate(&pool).await?;

            runtime
                .resilience
                .shutdown
                .register_component(Arc::new(PoolShutdown(pool.clone())))
                .await;
            Arc::new(PgCheckpointRepository::new(pool))
        }
        None => Arc::new(FileCheckpointRepository::new(section.directory.clone())),
    };

    Ok(CheckpointStore::with_settings(
        repository,
        runtime.config.checkpoint_settings(),
    ))
}

/// Closes the checkpoint pool once in-flight work has drained.
struct PoolShutdown(PgPool);

#[async_trait]
impl GracefulShutdown for PoolShutdown {
    async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.0.close().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "checkpoint_pool"
    }
}

/// Tier-1 summary of what the collection produced.
struct CollectionSummary;

#[async_trait]
impl PhaseHandler for CollectionSummary {
    fn phase(&self) -> CheckpointPhase {
        CheckpointPhase::Tier1
    }

    async fn run(&self, input: PhaseInput<'_>) -> site_scout_core::Result<Value> {
        let collected = input.collected;
        let failed: Vec<&str> = collected
            .outcomes
            .values()
            .filter(|o| !o.succeeded)
            .map(|o| o.source.as_str())
            .collect();

        Ok(json!({
            "dataQuality": collected.data_quality,
            "htmlOrigin": collected.html.origin,
            "launched": collected.outcomes.len(),
            "succeeded": collected.succeeded_sources(),
            "failed": failed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use site_scout_collector::synthesize;
    use site_scout_core::{
        CollectionOutcome, ErrorClass, SourceFailure, SourceKind, SourcePayload,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;
    use url::Url;

    #[tokio::test]
    async fn test_collection_summary() {
        let target = Url::parse("https://example.com/").unwrap();
        let collected = synthesize(
            RunId::new(),
            &target,
            vec![
                CollectionOutcome::success(
                    "raw_fetch",
                    SourceKind::RawHtml,
                    SourcePayload::Html {
                        content: "<html></html>".to_string(),
                        final_url: None,
                    },
                    80,
                ),
                CollectionOutcome::failure(
                    "rendered_capture",
                    SourceKind::RenderedHtml,
                    SourceFailure::new(ErrorClass::Unknown, "no browser", 2),
                    15,
                ),
            ],
            Duration::from_millis(90),
        );

        let summary = CollectionSummary
            .run(PhaseInput {
                run_id: collected.run_id,
                collected: &collected,
                previous: &BTreeMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(
            summary,
            json!({
                "dataQuality": "partial",
                "htmlOrigin": "raw",
                "launched": 2,
                "succeeded": 1,
                "failed": ["rendered_capture"],
            })
        );
    }
}
