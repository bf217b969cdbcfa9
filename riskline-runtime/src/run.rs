//! Pipeline runs and the run ledger
//!
//! A [`PipelineRun`] records the per-stage state machines of one execution.
//! Runs are only ever removed from the [`RunLedger`] by an explicit
//! [`RunLedger::cleanup`] with a retention policy.

use crate::stage::StageError;
use crate::state_machine::{RunState, StageState, StateMachine};
use chrono::{DateTime, Duration, Utc};
use riskline_core::Fingerprint;
use riskline_storage::{get_json, put_json, ObjectStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

/// Object store key of the persisted ledger
pub const LEDGER_KEY: &str = "runs/ledger.json";

/// Outcome tracking for one stage of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub kind: String,
    pub machine: StateMachine,
    /// Attempts made, including retries; 0 when the stage never started
    pub attempts: u32,
    pub cache_key: Option<String>,
    pub output_fingerprint: Option<Fingerprint>,
    pub error: Option<StageError>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            machine: StateMachine::new(),
            attempts: 0,
            cache_key: None,
            output_fingerprint: None,
            error: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> StageState {
        self.machine.current_state()
    }

    /// Time spent between dispatch and completion
    pub fn duration(&self) -> Option<Duration> {
        let started = self.machine.entered_at(StageState::Running)?;
        Some(self.finished_at? - started)
    }
}

/// One execution of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    /// Stage names in plan order
    pub order: Vec<String>,
    pub stages: BTreeMap<String, StageRecord>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Opaque compute parameters, recorded but never part of cache keys
    pub compute: BTreeMap<String, serde_json::Value>,
}

impl PipelineRun {
    pub fn new(
        pipeline: &str,
        stages: impl IntoIterator<Item = (String, String)>,
        compute: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let mut order = Vec::new();
        let mut records = BTreeMap::new();
        for (name, kind) in stages {
            records.insert(name.clone(), StageRecord::new(&kind));
            order.push(name);
        }
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            order,
            stages: records,
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            compute,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.get(name)
    }

    /// State of a stage; `None` for unknown names
    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        self.stages.get(name).map(StageRecord::state)
    }

    pub(crate) fn record_mut(&mut self, name: &str) -> crate::Result<&mut StageRecord> {
        self.stages
            .get_mut(name)
            .ok_or_else(|| crate::Error::NotFound(format!("stage '{}' in run {}", name, self.id)))
    }

    /// Records in plan order
    pub fn ordered(&self) -> impl Iterator<Item = (&str, &StageRecord)> {
        self.order
            .iter()
            .filter_map(|name| self.stages.get(name).map(|r| (name.as_str(), r)))
    }

    pub fn count(&self, state: StageState) -> usize {
        self.stages.values().filter(|r| r.state() == state).count()
    }

    /// Whether every stage was served from the cache
    pub fn fully_cached(&self) -> bool {
        self.stages.values().all(|r| r.state() == StageState::Cached)
    }

    pub fn is_finished(&self) -> bool {
        self.state != RunState::Running
    }
}

/// Which runs [`RunLedger::cleanup`] keeps
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// The newest runs always kept
    pub keep_last: usize,
    /// Older runs are removed only once they are at least this old;
    /// `None` removes every run beyond `keep_last`
    pub max_age: Option<Duration>,
}

/// Every known run, persisted as one JSON document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLedger {
    runs: BTreeMap<Uuid, PipelineRun>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run
    pub fn record(&mut self, run: PipelineRun) {
        self.runs.insert(run.id, run);
    }

    pub fn get(&self, id: &Uuid) -> Option<&PipelineRun> {
        self.runs.get(id)
    }

    /// Runs, newest first
    pub fn list(&self) -> Vec<&PipelineRun> {
        let mut runs: Vec<&PipelineRun> = self.runs.values().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Remove finished runs outside the retention policy; returns the removed ids
    pub fn cleanup(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<Uuid> {
        let removable: Vec<Uuid> = self
            .list()
            .into_iter()
            .skip(policy.keep_last)
            .filter(|run| run.is_finished())
            .filter(|run| policy.max_age.map_or(true, |age| now - run.started_at >= age))
            .map(|run| run.id)
            .collect();

        for id in &removable {
            self.runs.remove(id);
        }
        if !removable.is_empty() {
            info!(removed = removable.len(), kept = self.runs.len(), "Cleaned up pipeline runs");
        }
        removable
    }

    pub async fn save_to(&self, store: &dyn ObjectStore) -> riskline_storage::Result<()> {
        put_json(store, LEDGER_KEY, self).await
    }

    /// Load the ledger; an absent ledger is empty
    pub async fn load_from(store: &dyn ObjectStore) -> riskline_storage::Result<Self> {
        Ok(get_json(store, LEDGER_KEY).await?.unwrap_or_default())
    }
}
