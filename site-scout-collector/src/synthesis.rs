//! Folding settled collection outcomes into one [`CombinedResult`].

use chrono::Utc;
use site_scout_core::{
    CollectionOutcome, CombinedResult, DataQuality, HtmlOrigin, QualityTier, RunId,
    SourceKind, SynthesizedHtml, Timing,
};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Marker carried by every placeholder document.
pub const PLACEHOLDER_META: &str = "site-scout:placeholder";

/// Pick the best HTML available: rendered, then raw, then a placeholder built
/// from the target itself.
pub fn select_html(target: &Url, outcomes: &[CollectionOutcome]) -> SynthesizedHtml {
    let best = outcomes
        .iter()
        .filter(|o| o.kind.is_html())
        .filter_map(|o| o.usable_payload().and_then(|p| p.html()).map(|html| (o, html)))
        .max_by_key(|(o, _)| (o.kind.fidelity(), tier_rank(o.quality_tier)));

    match best {
        Some((outcome, html)) => SynthesizedHtml {
            origin: if outcome.kind == SourceKind::RenderedHtml {
                HtmlOrigin::Rendered
            } else {
                HtmlOrigin::Raw
            },
            source: Some(outcome.source.clone()),
            content: html.to_string(),
        },
        None => SynthesizedHtml {
            origin: HtmlOrigin::Placeholder,
            source: None,
            content: placeholder_html(target),
        },
    }
}

fn tier_rank(tier: QualityTier) -> u8 {
    match tier {
        QualityTier::Full => 2,
        QualityTier::Degraded => 1,
        QualityTier::Placeholder => 0,
    }
}

/// Minimal but structurally complete document for a target nothing could
/// fetch. Title and heading carry the host name.
pub fn placeholder_html(target: &Url) -> String {
    let host = escape_html(target.host_str().unwrap_or("unknown"));
    let url = escape_html(target.as_str());

    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"{meta}\" content=\"true\">\n\
         <title>{host}</title>\n\
         <link rel=\"canonical\" href=\"{url}\">\n\
         </head>\n\
         <body>\n\
         <h1>{host}</h1>\n\
         <main></main>\n\
         </body>\n\
         </html>\n",
        meta = PLACEHOLDER_META,
        host = host,
        url = url,
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `Full` when every source delivered a full-tier payload, `Partial` when at
/// least half delivered something usable, `Fallback` otherwise.
pub fn data_quality(outcomes: &[CollectionOutcome]) -> DataQuality {
    if outcomes.is_empty() {
        return DataQuality::Fallback;
    }

    if outcomes.iter().all(|o| o.quality_tier == QualityTier::Full) {
        return DataQuality::Full;
    }

    let usable = outcomes.iter().filter(|o| o.quality_tier.is_usable()).count();
    if usable * 2 >= outcomes.len() {
        DataQuality::Partial
    } else {
        DataQuality::Fallback
    }
}

pub fn timing(outcomes: &[CollectionOutcome], total: Duration) -> Timing {
    Timing {
        total_ms: total.as_millis() as u64,
        sources: outcomes
            .iter()
            .map(|o| (o.source.clone(), o.duration_ms))
            .collect(),
    }
}

pub fn synthesize(
    run_id: RunId,
    target: &Url,
    outcomes: Vec<CollectionOutcome>,
    total: Duration,
) -> CombinedResult {
    let html = select_html(target, &outcomes);
    let data_quality = data_quality(&outcomes);
    let timing = timing(&outcomes, total);

    let outcomes: BTreeMap<String, CollectionOutcome> = outcomes
        .into_iter()
        .map(|o| (o.source.clone(), o))
        .collect();

    CombinedResult {
        run_id,
        target: target.to_string(),
        html,
        outcomes,
        data_quality,
        timing,
        collected_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use site_scout_core::{ErrorClass, SourceFailure, SourcePayload};

    fn target() -> Url {
        Url::parse("https://example.test/").unwrap()
    }

    fn html(kind: SourceKind, content: &str) -> CollectionOutcome {
        CollectionOutcome::success(
            kind.default_name(),
            kind,
            SourcePayload::Html {
                content: content.to_string(),
                final_url: None,
            },
            10,
        )
    }

    fn failed(kind: SourceKind) -> CollectionOutcome {
        CollectionOutcome::failure(
            kind.default_name(),
            kind,
            SourceFailure::new(ErrorClass::ServerError, "HTTP 503", 2),
            20,
        )
    }

    #[test]
    fn test_rendered_html_preferred() {
        let outcomes = vec![
            html(SourceKind::RawHtml, "<p>raw</p>"),
            html(SourceKind::RenderedHtml, "<p>rendered</p>"),
        ];

        let selected = select_html(&target(), &outcomes);
        assert_eq!(selected.origin, HtmlOrigin::Rendered);
        assert_eq!(selected.content, "<p>rendered</p>");
        assert_eq!(selected.source.as_deref(), Some("rendered_capture"));
    }

    #[test]
    fn test_raw_html_when_rendering_failed() {
        let outcomes = vec![
            failed(SourceKind::RenderedHtml),
            html(SourceKind::RawHtml, "<p>raw</p>"),
        ];

        let selected = select_html(&target(), &outcomes);
        assert_eq!(selected.origin, HtmlOrigin::Raw);
        assert_eq!(selected.content, "<p>raw</p>");
    }

    #[test]
    fn test_placeholder_when_no_html() {
        let outcomes = vec![failed(SourceKind::RenderedHtml), failed(SourceKind::RawHtml)];

        let selected = select_html(&target(), &outcomes);
        assert_eq!(selected.origin, HtmlOrigin::Placeholder);
        assert_eq!(selected.source, None);
        assert!(selected.content.contains("<title>example.test</title>"));
        assert!(selected.content.contains("<h1>example.test</h1>"));
        assert!(selected.content.contains(PLACEHOLDER_META));
        assert!(selected.content.contains("<main></main>"));
    }

    #[test]
    fn test_data_quality_tiers() {
        let all_ok = vec![
            html(SourceKind::RawHtml, "a"),
            html(SourceKind::RenderedHtml, "b"),
        ];
        assert_eq!(data_quality(&all_ok), DataQuality::Full);

        let half = vec![html(SourceKind::RawHtml, "a"), failed(SourceKind::RenderedHtml)];
        assert_eq!(data_quality(&half), DataQuality::Partial);

        let mostly_failed = vec![
            html(SourceKind::RawHtml, "a"),
            failed(SourceKind::RenderedHtml),
            failed(SourceKind::AboveFoldScreenshot),
        ];
        assert_eq!(data_quality(&mostly_failed), DataQuality::Fallback);

        assert_eq!(data_quality(&[]), DataQuality::Fallback);
    }

    #[test]
    fn test_degraded_payload_is_partial_not_full() {
        let degraded = CollectionOutcome::degraded(
            "performance",
            SourceKind::Performance,
            SourcePayload::Performance(Default::default()),
            None,
            5,
        );
        let outcomes = vec![html(SourceKind::RawHtml, "a"), degraded];

        assert_eq!(data_quality(&outcomes), DataQuality::Partial);
    }

    #[test]
    fn test_timing_has_entry_per_source() {
        let outcomes = vec![html(SourceKind::RawHtml, "a"), failed(SourceKind::RenderedHtml)];

        let timing = timing(&outcomes, Duration::from_millis(1500));
        assert_eq!(timing.total_ms, 1500);
        assert_eq!(timing.sources.len(), 2);
        assert_eq!(timing.sources["rendered_capture"], 20);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
