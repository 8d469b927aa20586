use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::error::{CoreError, Result};

// ===== Viewport =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Validate)]
#[serde(deny_unknown_fields)]
pub struct Viewport {
    #[validate(range(min = 320, max = 7680))]
    pub width: u32,
    #[validate(range(min = 240, max = 4320))]
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl std::str::FromStr for Viewport {
    type Err = CoreError;

    /// Parses `WIDTHxHEIGHT`, e.g. `1366x768`.
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| CoreError::Validation(format!("viewport '{}' is not WIDTHxHEIGHT", s)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("invalid viewport width '{}'", w)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("invalid viewport height '{}'", h)))?;
        let viewport = Viewport::new(width, height);
        viewport.validate()?;
        Ok(viewport)
    }
}

// ===== Collector Configuration =====

/// Per-call options recognized by the parallel collector.
///
/// Unknown keys are rejected when deserializing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CollectorConfig {
    #[serde(default)]
    #[validate(nested)]
    pub viewport: Viewport,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_capture_full_page")]
    pub capture_full_page: bool,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./captures")
}

fn default_capture_full_page() -> bool {
    true
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            output_directory: default_output_directory(),
            capture_full_page: default_capture_full_page(),
        }
    }
}

impl CollectorConfig {
    /// Build a config from a JSON object, rejecting unknown keys and
    /// out-of-range values.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: CollectorConfig = serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    pub fn with_capture_full_page(mut self, capture: bool) -> Self {
        self.capture_full_page = capture;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = CollectorConfig::from_json(json!({})).unwrap();
        assert_eq!(config, CollectorConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = CollectorConfig::from_json(json!({ "fullPage": true })).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_unknown_viewport_key_rejected() {
        let err = CollectorConfig::from_json(json!({
            "viewport": { "width": 800, "height": 600, "depth": 2 }
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_viewport_out_of_range_rejected() {
        let err = CollectorConfig::from_json(json!({
            "viewport": { "width": 10, "height": 600 }
        }))
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_viewport_from_str() {
        let viewport: Viewport = "1366x768".parse().unwrap();
        assert_eq!(viewport, Viewport::new(1366, 768));
        assert!("1366".parse::<Viewport>().is_err());
        assert!("axb".parse::<Viewport>().is_err());
    }
}
