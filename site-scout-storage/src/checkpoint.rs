//! Best-effort persistence of run progress.
//!
//! A [`CheckpointStore`] writes the last completed phase of a run through a
//! [`CheckpointRepository`] and decides, when the run is restarted, whether
//! the stored progress can be resumed. Writes never fail the run: a failed
//! save is logged and reported as `false`. A checkpoint that cannot be read
//! is treated like a missing one.

use chrono::Utc;
use serde_json::Value;
use site_scout_core::{CheckpointPhase, CheckpointRepository, RunCheckpoint, RunId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CheckpointSettings {
    /// Checkpoints older than this are discarded on resume
    pub staleness_limit: Duration,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            staleness_limit: Duration::from_secs(60 * 60),
        }
    }
}

/// Progress recovered from a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Last phase that completed
    pub phase: CheckpointPhase,
    pub completed_components: BTreeSet<String>,
    pub partial_results: Option<Value>,
    pub age: Duration,
}

impl ResumePoint {
    /// Phase to run next, `None` when the run already finished.
    pub fn next_phase(&self) -> Option<CheckpointPhase> {
        self.phase.next()
    }
}

/// Why a run starts over.
#[derive(Debug, Clone, PartialEq)]
pub enum FreshReason {
    NotFound,
    Stale { age: Duration },
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    Resume(ResumePoint),
    Fresh(FreshReason),
}

impl ResumeDecision {
    pub fn can_resume(&self) -> bool {
        matches!(self, ResumeDecision::Resume(_))
    }

    pub fn resume_point(&self) -> Option<&ResumePoint> {
        match self {
            ResumeDecision::Resume(point) => Some(point),
            ResumeDecision::Fresh(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct CheckpointStore {
    repository: Arc<dyn CheckpointRepository>,
    settings: CheckpointSettings,
}

impl CheckpointStore {
    pub fn new(repository: Arc<dyn CheckpointRepository>) -> Self {
        Self::with_settings(repository, CheckpointSettings::default())
    }

    pub fn with_settings(
        repository: Arc<dyn CheckpointRepository>,
        settings: CheckpointSettings,
    ) -> Self {
        Self {
            repository,
            settings,
        }
    }

    pub fn settings(&self) -> &CheckpointSettings {
        &self.settings
    }

    /// Record that `phase` completed. Returns whether the write succeeded.
    pub async fn save(
        &self,
        run_id: RunId,
        phase: CheckpointPhase,
        completed_components: BTreeSet<String>,
        partial_results: Option<Value>,
    ) -> bool {
        let checkpoint = RunCheckpoint::new(run_id, phase, completed_components, partial_results);
        self.save_checkpoint(&checkpoint).await
    }

    pub async fn save_checkpoint(&self, checkpoint: &RunCheckpoint) -> bool {
        let document = match serde_json::to_value(checkpoint) {
            Ok(document) => document,
            Err(e) => {
                warn!(run_id = %checkpoint.run_id, error = %e, "Failed to encode checkpoint");
                return false;
            }
        };

        match self.repository.store(&checkpoint.run_id, document).await {
            Ok(()) => {
                debug!(
                    run_id = %checkpoint.run_id,
                    phase = %checkpoint.phase,
                    components = checkpoint.completed_components.len(),
                    "Checkpoint saved"
                );
                true
            }
            Err(e) => {
                warn!(
                    run_id = %checkpoint.run_id,
                    phase = %checkpoint.phase,
                    error = %e,
                    "Failed to save checkpoint, continuing without it"
                );
                false
            }
        }
    }

    /// Decide whether `run_id` can pick up where it left off.
    pub async fn try_resume(&self, run_id: &RunId) -> ResumeDecision {
        let document = match self.repository.load(run_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return ResumeDecision::Fresh(FreshReason::NotFound),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Checkpoint read failed, starting fresh");
                return ResumeDecision::Fresh(FreshReason::Unreadable(e.to_string()));
            }
        };

        let checkpoint: RunCheckpoint = match serde_json::from_value(document) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Checkpoint is malformed, starting fresh");
                return ResumeDecision::Fresh(FreshReason::Unreadable(e.to_string()));
            }
        };

        if checkpoint.run_id != *run_id {
            warn!(
                run_id = %run_id,
                stored_run_id = %checkpoint.run_id,
                "Checkpoint belongs to another run, starting fresh"
            );
            return ResumeDecision::Fresh(FreshReason::Unreadable(format!(
                "checkpoint is for run {}",
                checkpoint.run_id
            )));
        }

        let age = checkpoint.age(Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if age > self.settings.staleness_limit {
            info!(
                run_id = %run_id,
                age_secs = age.as_secs(),
                "Checkpoint is stale, starting fresh"
            );
            return ResumeDecision::Fresh(FreshReason::Stale { age });
        }

        info!(run_id = %run_id, phase = %checkpoint.phase, "Resuming from checkpoint");
        ResumeDecision::Resume(ResumePoint {
            phase: checkpoint.phase,
            completed_components: checkpoint.completed_components,
            partial_results: checkpoint.partial_results,
            age,
        })
    }

    /// Drop the checkpoint once a run completes. Best-effort like `save`.
    pub async fn clear(&self, run_id: &RunId) -> bool {
        match self.repository.remove(run_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to clear checkpoint");
                false
            }
        }
    }
}
