use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::failure::SourceFailure;
use super::ids::RunId;

// ===== Sources =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    RawHtml,
    RenderedHtml,
    AboveFoldScreenshot,
    FullPageScreenshot,
    Performance,
}

impl SourceKind {
    /// Conventional dependency name for a source of this kind.
    pub fn default_name(&self) -> &'static str {
        match self {
            SourceKind::RawHtml => "raw_fetch",
            SourceKind::RenderedHtml => "rendered_capture",
            SourceKind::AboveFoldScreenshot => "above_fold_screenshot",
            SourceKind::FullPageScreenshot => "full_page_screenshot",
            SourceKind::Performance => "performance",
        }
    }

    pub fn is_html(&self) -> bool {
        matches!(self, SourceKind::RawHtml | SourceKind::RenderedHtml)
    }

    /// Higher wins when two sources produce interchangeable payloads.
    pub fn fidelity(&self) -> u8 {
        match self {
            SourceKind::RenderedHtml => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Full,
    Degraded,
    Placeholder,
}

impl QualityTier {
    pub fn is_usable(&self) -> bool {
        !matches!(self, QualityTier::Placeholder)
    }
}

// ===== Payloads =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotCapture {
    pub path: PathBuf,
    pub bytes: u64,
    pub width: u32,
    pub height: u32,
    pub full_page: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PerformanceReport {
    /// Overall score in `0.0..=1.0`, absent when the measurement failed.
    pub score: Option<f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Set on degraded reports to name why the measurement is missing.
    pub diagnosis: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourcePayload {
    Html {
        content: String,
        final_url: Option<String>,
    },
    Screenshot(ScreenshotCapture),
    Performance(PerformanceReport),
    Placeholder {
        note: String,
    },
}

impl SourcePayload {
    pub fn html(&self) -> Option<&str> {
        match self {
            SourcePayload::Html { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, SourcePayload::Placeholder { .. })
    }
}

// ===== Per-source outcome =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionOutcome {
    pub source: String,
    pub kind: SourceKind,
    pub succeeded: bool,
    pub payload: Option<SourcePayload>,
    pub error: Option<SourceFailure>,
    pub duration_ms: u64,
    pub quality_tier: QualityTier,
}

impl CollectionOutcome {
    pub fn success(
        source: impl Into<String>,
        kind: SourceKind,
        payload: SourcePayload,
        duration_ms: u64,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            succeeded: true,
            payload: Some(payload),
            error: None,
            duration_ms,
            quality_tier: QualityTier::Full,
        }
    }

    /// A payload was produced, but only from a fallback path.
    pub fn degraded(
        source: impl Into<String>,
        kind: SourceKind,
        payload: SourcePayload,
        error: Option<SourceFailure>,
        duration_ms: u64,
    ) -> Self {
        let quality_tier = if payload.is_placeholder() {
            QualityTier::Placeholder
        } else {
            QualityTier::Degraded
        };
        Self {
            source: source.into(),
            kind,
            succeeded: quality_tier.is_usable(),
            payload: Some(payload),
            error,
            duration_ms,
            quality_tier,
        }
    }

    pub fn failure(
        source: impl Into<String>,
        kind: SourceKind,
        error: SourceFailure,
        duration_ms: u64,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            succeeded: false,
            payload: None,
            error: Some(error),
            duration_ms,
            quality_tier: QualityTier::Placeholder,
        }
    }

    /// Payload worth handing downstream (placeholders excluded).
    pub fn usable_payload(&self) -> Option<&SourcePayload> {
        if self.quality_tier.is_usable() {
            self.payload.as_ref()
        } else {
            None
        }
    }
}

// ===== Combined result =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Full,
    Partial,
    Fallback,
}

impl DataQuality {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, DataQuality::Full)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HtmlOrigin {
    Rendered,
    Raw,
    Placeholder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesizedHtml {
    pub origin: HtmlOrigin,
    pub source: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Timing {
    pub total_ms: u64,
    pub sources: BTreeMap<String, u64>,
}

/// Everything the downstream scoring layer sees of one collection run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CombinedResult {
    pub run_id: RunId,
    pub target: String,
    pub html: SynthesizedHtml,
    pub outcomes: BTreeMap<String, CollectionOutcome>,
    pub data_quality: DataQuality,
    pub timing: Timing,
    pub collected_at: DateTime<Utc>,
}

impl CombinedResult {
    pub fn outcome(&self, source: &str) -> Option<&CollectionOutcome> {
        self.outcomes.get(source)
    }

    pub fn succeeded_sources(&self) -> usize {
        self.outcomes.values().filter(|o| o.succeeded).count()
    }

    pub fn screenshot(&self, kind: SourceKind) -> Option<&ScreenshotCapture> {
        self.outcomes
            .values()
            .filter(|o| o.kind == kind)
            .find_map(|o| match o.usable_payload() {
                Some(SourcePayload::Screenshot(capture)) => Some(capture),
                _ => None,
            })
    }

    pub fn performance(&self) -> Option<&PerformanceReport> {
        self.outcomes.values().find_map(|o| match o.usable_payload() {
            Some(SourcePayload::Performance(report)) => Some(report),
            _ => None,
        })
    }
}
