pub mod collect;
pub mod run;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use site_scout_collector::{
    BrowserEngine, BrowserShutdown, ParallelDataCollector, PerformanceSource, RawFetchConfig,
    RawFetchSource, RenderedHtmlSource, ResilienceContext, ScreenshotSource, UnavailableBrowser,
};
use site_scout_core::{CollectorConfig, Viewport};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "site-scout", version, about = "Collect everything about a website, resiliently")]
pub struct Cli {
    /// Override the configured log format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one collection and print the combined result
    Collect(collect::CollectArgs),
    /// Run the phased job, resuming from a checkpoint when one exists
    Run(run::RunArgs),
}

/// Options shared by every command that collects.
#[derive(Debug, Clone, Args)]
pub struct CaptureArgs {
    /// Website to collect, e.g. `example.com` or `https://example.com/page`
    pub target: String,

    /// Browser viewport as WIDTHxHEIGHT
    #[arg(long)]
    pub viewport: Option<Viewport>,

    /// Directory screenshots are written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Skip the full-page screenshot
    #[arg(long)]
    pub no_full_page: bool,

    /// Print the full JSON result instead of a summary
    #[arg(long)]
    pub json: bool,
}

impl CaptureArgs {
    pub fn collector_config(&self) -> CollectorConfig {
        let mut config = CollectorConfig::default().with_capture_full_page(!self.no_full_page);
        if let Some(viewport) = self.viewport {
            config = config.with_viewport(viewport);
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_directory(dir.clone());
        }
        config
    }
}

/// Long-lived state shared by the commands of one process.
pub struct Runtime {
    pub config: AppConfig,
    pub resilience: Arc<ResilienceContext>,
    pub engine: Arc<dyn BrowserEngine>,
}

impl Runtime {
    pub async fn new(config: AppConfig) -> Self {
        let resilience = Arc::new(ResilienceContext::new(config.resilience_settings()));
        let engine: Arc<dyn BrowserEngine> = Arc::new(UnavailableBrowser);

        resilience
            .shutdown
            .register_component(Arc::new(BrowserShutdown::new(engine.clone())))
            .await;

        Self {
            config,
            resilience,
            engine,
        }
    }

    /// A collector with every built-in source registered.
    pub fn collector(&self) -> Result<ParallelDataCollector> {
        let mut raw = RawFetchConfig::default();
        if let Some(agent) = &self.config.collector.user_agent {
            raw = raw.with_user_agent(agent.clone());
        }

        let mut collector = ParallelDataCollector::new(self.resilience.clone())
            .with_settings(self.config.collector_settings())
            .with_source(Arc::new(RawFetchSource::new(raw)?))
            .with_source(Arc::new(RenderedHtmlSource::new(self.engine.clone())))
            .with_source(Arc::new(ScreenshotSource::above_fold(self.engine.clone())))
            .with_source(Arc::new(ScreenshotSource::full_page(self.engine.clone())));

        if let Some(performance) = self.config.performance_config()? {
            collector.register(Arc::new(PerformanceSource::new(performance)?));
        }

        Ok(collector)
    }
}

pub async fn execute(runtime: &Runtime, command: Command) -> Result<()> {
    match command {
        Command::Collect(args) => collect::execute(runtime, args).await,
        Command::Run(args) => run::execute(runtime, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collect_arguments() {
        let cli = Cli::parse_from([
            "site-scout",
            "collect",
            "example.com",
            "--viewport",
            "1366x768",
            "--no-full-page",
            "--json",
        ]);

        let Command::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert!(args.capture.json);

        let config = args.capture.collector_config();
        assert_eq!(config.viewport, Viewport::new(1366, 768));
        assert!(!config.capture_full_page);
        assert_eq!(config.output_directory, CollectorConfig::default().output_directory);
    }

    #[test]
    fn test_out_of_range_viewport_is_rejected() {
        let parsed = Cli::try_parse_from([
            "site-scout",
            "collect",
            "example.com",
            "--viewport",
            "10x10",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "site-scout",
            "--log-format",
            "json",
            "run",
            "https://example.com",
            "--run-id",
            "7f9c24e8-3b12-4fef-91e0-6a2f5d3c8b41",
        ])
        .unwrap();

        assert_eq!(cli.log_format, Some(LogFormat::Json));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.run_id.map(|id| id.to_string()).as_deref(),
            Some("7f9c24e8-3b12-4fef-91e0-6a2f5d3c8b41")
        );
        assert_eq!(args.capture.target, "https://example.com");
    }

    #[tokio::test]
    async fn test_performance_source_only_with_endpoint() {
        let runtime = Runtime::new(AppConfig::default()).await;
        let collector = runtime.collector().unwrap();
        assert_eq!(
            collector.source_names(),
            vec![
                "raw_fetch",
                "rendered_capture",
                "above_fold_screenshot",
                "full_page_screenshot"
            ]
        );

        let mut config = AppConfig::default();
        config.performance.endpoint = Some("https://perf.example.test/run".to_string());
        let runtime = Runtime::new(config).await;
        assert!(runtime
            .collector()
            .unwrap()
            .source_names()
            .contains(&"performance"));
    }
}
