//! Consolidated run report

use crate::run::PipelineRun;
use crate::stage::{FailureClass, StageError};
use crate::state_machine::{RunState, StageState};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRow {
    pub name: String,
    pub kind: String,
    pub state: StageState,
    pub attempts: u32,
    pub duration_ms: Option<i64>,
    pub error: Option<StageError>,
}

/// Per-stage outcomes plus every stage error of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub state: RunState,
    /// Stages in plan order
    pub stages: Vec<StageRow>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let stages = run
            .ordered()
            .map(|(name, record)| StageRow {
                name: name.to_string(),
                kind: record.kind.clone(),
                state: record.state(),
                attempts: record.attempts,
                duration_ms: record.duration().map(|d| d.num_milliseconds()),
                error: record.error.clone(),
            })
            .collect();
        Self {
            run_id: run.id,
            pipeline: run.pipeline.clone(),
            state: run.state,
            stages,
        }
    }

    /// `(stage, error)` for every failed stage, in plan order
    pub fn errors(&self) -> Vec<(&str, &StageError)> {
        self.stages
            .iter()
            .filter_map(|row| row.error.as_ref().map(|e| (row.name.as_str(), e)))
            .collect()
    }

    /// The first failure that is not a consequence of another one
    pub fn primary_error(&self) -> Option<(&str, &StageError)> {
        self.errors().into_iter().find(|(_, e)| {
            !matches!(e.class, FailureClass::UpstreamFailed | FailureClass::Cancelled)
        })
    }

    /// Process exit status: 0 on success, otherwise the code of the primary
    /// failure class
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Succeeded => 0,
            RunState::Running => FailureClass::Internal.exit_code(),
            RunState::Cancelled => self
                .primary_error()
                .map_or(FailureClass::Cancelled.exit_code(), |(_, e)| e.class.exit_code()),
            RunState::Failed => self
                .primary_error()
                .map_or(FailureClass::Internal.exit_code(), |(_, e)| e.class.exit_code()),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} ({}): {}", self.run_id, self.pipeline, self.state)?;
        let width = self.stages.iter().map(|s| s.name.len()).max().unwrap_or(0);
        for row in &self.stages {
            write!(
                f,
                "  {:<width$}  {:<9}  attempts={}",
                row.name,
                row.state.as_str(),
                row.attempts,
                width = width
            )?;
            if let Some(ms) = row.duration_ms {
                write!(f, "  {}ms", ms)?;
            }
            writeln!(f)?;
        }

        let errors = self.errors();
        if !errors.is_empty() {
            writeln!(f, "errors:")?;
            for (stage, err) in errors {
                writeln!(f, "  {}: {}", stage, err)?;
            }
        }
        Ok(())
    }
}
