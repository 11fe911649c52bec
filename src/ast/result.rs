//! Step results
//!
//! - `StepOutcome`: what the executor hands back (never an error)
//! - `StepResult`: the persisted record of one executed step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{Step, StepKind};

/// Error text for a step interrupted by `stop()`
pub const STOPPED: &str = "stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub output: String,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Success,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Interrupted by a stop request
    pub fn stopped() -> Self {
        Self::failed(STOPPED)
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Persisted result of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_name: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepResult {
    /// A `running` placeholder written before the step executes
    pub fn started(step_index: usize, step: &Step) -> Self {
        Self {
            step_index,
            step_name: step.name.clone(),
            kind: step.kind(),
            started_at: Utc::now(),
            completed_at: None,
            status: StepStatus::Running,
            output: String::new(),
            error: None,
        }
    }

    /// Overwrite with the executor's outcome
    pub fn finish(&mut self, outcome: StepOutcome) {
        self.status = outcome.status;
        self.output = outcome.output;
        self.error = outcome.error;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.status == StepStatus::Running
    }
}
