//! Phased analysis job with checkpoint resume.
//!
//! Phases run in [`CheckpointPhase`] order. After each one a checkpoint is
//! saved carrying the collected data and every phase output so far, so a
//! restarted job skips straight to the first phase that has not completed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use site_scout_core::{CheckpointPhase, CollectorConfig, CombinedResult, Result, RunId};
use site_scout_storage::{CheckpointStore, ResumeDecision};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collector::ParallelDataCollector;

/// Phases after data collection that a handler may serve.
const ANALYSIS_PHASES: [CheckpointPhase; 4] = [
    CheckpointPhase::Tier1,
    CheckpointPhase::Tier2,
    CheckpointPhase::Tier3,
    CheckpointPhase::Insights,
];

/// What a phase handler gets to work with.
pub struct PhaseInput<'a> {
    pub run_id: RunId,
    pub collected: &'a CombinedResult,
    /// Outputs of the phases that already ran, keyed by phase name.
    pub previous: &'a BTreeMap<String, Value>,
}

/// Scoring collaborator for one analysis phase.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    fn phase(&self) -> CheckpointPhase;

    async fn run(&self, input: PhaseInput<'_>) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PartialResults {
    collected: CombinedResult,
    #[serde(default)]
    phases: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub run_id: RunId,
    /// Last completed phase of the checkpoint the job resumed from.
    pub resumed_from: Option<CheckpointPhase>,
    pub phases_run: Vec<CheckpointPhase>,
    pub result: CombinedResult,
    pub phase_outputs: BTreeMap<String, Value>,
}

pub struct AnalysisJob {
    collector: Arc<ParallelDataCollector>,
    store: CheckpointStore,
    handlers: BTreeMap<CheckpointPhase, Arc<dyn PhaseHandler>>,
}

impl AnalysisJob {
    pub fn new(collector: Arc<ParallelDataCollector>, store: CheckpointStore) -> Self {
        Self {
            collector,
            store,
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler. A later handler for the same phase replaces the
    /// earlier one.
    pub fn with_handler(mut self, handler: Arc<dyn PhaseHandler>) -> Self {
        self.handlers.insert(handler.phase(), handler);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub async fn run(
        &self,
        run_id: RunId,
        target: &str,
        config: &CollectorConfig,
    ) -> Result<JobReport> {
        let (resumed_from, restored) = self.resume(&run_id).await;
        let mut phases_run = Vec::new();

        let (collected, mut phase_outputs) = match restored {
            Some(partial) => (partial.collected, partial.phases),
            None => {
                let collected = self.collector.collect_for_run(run_id, target, config).await?;
                let outputs = BTreeMap::new();
                phases_run.push(CheckpointPhase::DataCollection);
                self.checkpoint(run_id, CheckpointPhase::DataCollection, &collected, &outputs)
                    .await;
                (collected, outputs)
            }
        };

        for phase in ANALYSIS_PHASES {
            if resumed_from.is_some_and(|done| phase <= done) {
                debug!(run_id = %run_id, phase = %phase, "Phase already completed, skipping");
                continue;
            }

            let Some(handler) = self.handlers.get(&phase) else {
                debug!(run_id = %run_id, phase = %phase, "No handler registered for phase");
                continue;
            };

            info!(run_id = %run_id, phase = %phase, "Running phase");
            let output = handler
                .run(PhaseInput {
                    run_id,
                    collected: &collected,
                    previous: &phase_outputs,
                })
                .await?;

            phase_outputs.insert(phase.as_str().to_string(), output);
            phases_run.push(phase);
            self.checkpoint(run_id, phase, &collected, &phase_outputs).await;
        }

        self.store.clear(&run_id).await;
        info!(
            run_id = %run_id,
            phases = phases_run.len(),
            resumed = resumed_from.is_some(),
            "Analysis job completed"
        );

        Ok(JobReport {
            run_id,
            resumed_from,
            phases_run,
            result: collected,
            phase_outputs,
        })
    }

    async fn resume(&self, run_id: &RunId) -> (Option<CheckpointPhase>, Option<PartialResults>) {
        let point = match self.store.try_resume(run_id).await {
            ResumeDecision::Resume(point) => point,
            ResumeDecision::Fresh(reason) => {
                debug!(run_id = %run_id, reason = ?reason, "Starting fresh");
                return (None, None);
            }
        };

        let Some(document) = point.partial_results.clone() else {
            warn!(
                run_id = %run_id,
                phase = %point.phase,
                "Checkpoint has no partial results, starting fresh"
            );
            return (None, None);
        };

        match serde_json::from_value::<PartialResults>(document) {
            Ok(partial) => {
                info!(
                    run_id = %run_id,
                    phase = %point.phase,
                    age_secs = point.age.as_secs(),
                    "Resuming from checkpoint"
                );
                (Some(point.phase), Some(partial))
            }
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    error = %e,
                    "Checkpoint partial results unusable, starting fresh"
                );
                (None, None)
            }
        }
    }

    async fn checkpoint(
        &self,
        run_id: RunId,
        phase: CheckpointPhase,
        collected: &CombinedResult,
        phases: &BTreeMap<String, Value>,
    ) {
        let mut components: BTreeSet<String> = collected
            .outcomes
            .values()
            .filter(|o| o.succeeded)
            .map(|o| o.source.clone())
            .collect();
        components.extend(phases.keys().cloned());

        let partial = PartialResults {
            collected: collected.clone(),
            phases: phases.clone(),
        };

        match serde_json::to_value(&partial) {
            Ok(document) => {
                self.store.save(run_id, phase, components, Some(document)).await;
            }
            Err(e) => {
                warn!(
                    run_id = %run_id,
                    phase = %phase,
                    error = %e,
                    "Could not serialize checkpoint"
                );
            }
        }
    }
}
