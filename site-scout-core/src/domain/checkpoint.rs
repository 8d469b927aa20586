use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::ids::RunId;

/// Phases of one analysis job, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    DataCollection,
    Tier1,
    Tier2,
    Tier3,
    Insights,
    Complete,
}

impl CheckpointPhase {
    pub const ALL: [CheckpointPhase; 6] = [
        CheckpointPhase::DataCollection,
        CheckpointPhase::Tier1,
        CheckpointPhase::Tier2,
        CheckpointPhase::Tier3,
        CheckpointPhase::Insights,
        CheckpointPhase::Complete,
    ];

    pub fn next(&self) -> Option<CheckpointPhase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckpointPhase::Complete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointPhase::DataCollection => "data_collection",
            CheckpointPhase::Tier1 => "tier1",
            CheckpointPhase::Tier2 => "tier2",
            CheckpointPhase::Tier3 => "tier3",
            CheckpointPhase::Insights => "insights",
            CheckpointPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress document persisted after each phase. `phase` is the last
/// phase that completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCheckpoint {
    pub run_id: RunId,
    pub phase: CheckpointPhase,
    pub completed_components: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_results: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn new(
        run_id: RunId,
        phase: CheckpointPhase,
        completed_components: BTreeSet<String>,
        partial_results: Option<serde_json::Value>,
    ) -> Self {
        Self {
            run_id,
            phase,
            completed_components,
            partial_results,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}
