//! Output formatting for CLI commands

use anyhow::Result;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Serialize;
use site_scout_collector::JobReport;
use site_scout_core::{CollectionOutcome, CombinedResult, DataQuality, QualityTier};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

fn tier_cell(tier: QualityTier) -> Cell {
    let (label, color) = match tier {
        QualityTier::Full => ("full", Color::Green),
        QualityTier::Degraded => ("degraded", Color::Yellow),
        QualityTier::Placeholder => ("placeholder", Color::Red),
    };
    Cell::new(label).fg(color)
}

fn quality_label(quality: DataQuality) -> &'static str {
    match quality {
        DataQuality::Full => "full",
        DataQuality::Partial => "partial",
        DataQuality::Fallback => "fallback",
    }
}

fn outcome_row(outcome: &CollectionOutcome) -> Vec<Cell> {
    let (attempts, error) = match &outcome.error {
        Some(failure) => (
            failure.attempts.to_string(),
            format!("{}: {}", failure.class, failure.message),
        ),
        None => ("-".to_string(), String::new()),
    };

    vec![
        Cell::new(&outcome.source),
        tier_cell(outcome.quality_tier),
        Cell::new(format!("{} ms", outcome.duration_ms)),
        Cell::new(attempts),
        Cell::new(error),
    ]
}

/// One row per launched source.
pub fn outcome_table(result: &CombinedResult) -> Table {
    let mut table = new_table(&["Source", "Tier", "Duration", "Attempts", "Error"]);
    for outcome in result.outcomes.values() {
        table.add_row(outcome_row(outcome));
    }
    table
}

pub fn print_collection(result: &CombinedResult) {
    println!("Run:      {}", result.run_id);
    println!("Target:   {}", result.target);
    println!("Quality:  {}", quality_label(result.data_quality));
    println!(
        "HTML:     {:?} ({} bytes)",
        result.html.origin,
        result.html.content.len()
    );
    println!("Total:    {} ms", result.timing.total_ms);
    println!();
    println!("{}", outcome_table(result));
}

pub fn print_job(report: &JobReport) {
    print_collection(&report.result);
    println!();

    match report.resumed_from {
        Some(phase) => println!("Resumed after phase '{}'", phase),
        None => println!("Started fresh"),
    }

    let mut table = new_table(&["Phase", "Output"]);
    for phase in &report.phases_run {
        let output = report
            .phase_outputs
            .get(phase.as_str())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![Cell::new(phase.as_str()), Cell::new(output)]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_scout_core::{ErrorClass, SourceFailure, SourceKind, SourcePayload};

    #[test]
    fn test_outcome_row_shows_failure() {
        let outcome = CollectionOutcome::failure(
            "rendered_capture",
            SourceKind::RenderedHtml,
            SourceFailure::new(ErrorClass::Timeout, "budget elapsed", 2),
            30_000,
        );

        let rendered: Vec<String> = outcome_row(&outcome)
            .iter()
            .map(|cell| cell.content())
            .collect();

        assert_eq!(rendered[0], "rendered_capture");
        assert_eq!(rendered[1], "placeholder");
        assert_eq!(rendered[2], "30000 ms");
        assert_eq!(rendered[3], "2");
        assert_eq!(rendered[4], "timeout: budget elapsed");
    }

    #[test]
    fn test_outcome_row_for_success() {
        let outcome = CollectionOutcome::success(
            "raw_fetch",
            SourceKind::RawHtml,
            SourcePayload::Html {
                content: "<html></html>".to_string(),
                final_url: None,
            },
            120,
        );

        let rendered: Vec<String> = outcome_row(&outcome)
            .iter()
            .map(|cell| cell.content())
            .collect();

        assert_eq!(rendered[1], "full");
        assert_eq!(rendered[3], "-");
        assert_eq!(rendered[4], "");
    }
}
