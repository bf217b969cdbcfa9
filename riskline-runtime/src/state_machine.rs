//! Stage and run state machines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Waiting for dependencies
    Pending,

    /// Dispatched to the worker pool
    Running,

    /// Executed and produced an output
    Succeeded,

    /// Output was served from the cache
    Cached,

    /// Stage failed, or never started because of an upstream failure or cancellation
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Cached | StageState::Failed
        )
    }

    /// Whether dependents may consume this stage's output
    pub fn is_success(&self) -> bool {
        matches!(self, StageState::Succeeded | StageState::Cached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::Cached => "cached",
            StageState::Failed => "failed",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine for one stage, keeping a timestamped history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachine {
    current_state: StageState,
    state_history: Vec<(StageState, DateTime<Utc>)>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current_state: StageState::Pending,
            state_history: vec![(StageState::Pending, Utc::now())],
        }
    }

    pub fn current_state(&self) -> StageState {
        self.current_state
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: StageState) -> crate::Result<()> {
        if !self.is_valid_transition(new_state) {
            return Err(crate::Error::InvalidState(format!(
                "invalid transition from {} to {}",
                self.current_state, new_state
            )));
        }

        self.current_state = new_state;
        self.state_history.push((new_state, Utc::now()));
        Ok(())
    }

    fn is_valid_transition(&self, new_state: StageState) -> bool {
        use StageState::*;

        matches!(
            (self.current_state, new_state),
            (Pending, Running) | (Pending, Failed) | (Running, Succeeded | Cached | Failed)
        )
    }

    pub fn history(&self) -> &[(StageState, DateTime<Utc>)] {
        &self.state_history
    }

    /// When the stage entered `state`, if it did
    pub fn entered_at(&self, state: StageState) -> Option<DateTime<Utc>> {
        self.state_history
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, at)| *at)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
