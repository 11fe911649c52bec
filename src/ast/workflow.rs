//! Workflow Types - the stored document and its inputs
//!
//! - `Workflow`: the whole document (definition + run-state)
//! - `WorkflowSpec`: creation input
//! - `WorkflowPatch`: partial update input
//! - `Target`: session / host a run acts upon

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OpflowError, Result};

use super::result::StepResult;
use super::step::{validate_steps, Step, StepSpec};

/// Run status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed or failed: no run-control accepted
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `run()` is permitted from these
    pub fn can_run(&self) -> bool {
        matches!(self, Self::Draft | Self::Ready | Self::Paused)
    }

    /// Carries results/current_step from a previous run
    pub fn has_run_state(&self) -> bool {
        matches!(self, Self::Paused | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = OpflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(OpflowError::Validation {
                reason: format!("unknown workflow status '{}'", other),
            }),
        }
    }
}

/// Remote session and/or host a workflow acts upon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Target {
    pub fn session(id: u32) -> Self {
        Self {
            session: Some(id),
            host: None,
        }
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self {
            session: None,
            host: Some(host.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.host.as_deref().map_or(true, |h| h.trim().is_empty())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.session, &self.host) {
            (Some(s), Some(h)) => write!(f, "session {} @ {}", s, h),
            (Some(s), None) => write!(f, "session {}", s),
            (None, Some(h)) => write!(f, "{}", h),
            (None, None) => f.write_str("-"),
        }
    }
}

/// Workflow creation input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Partial update: `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub steps: Option<Vec<StepSpec>>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
}

/// The stored workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub target: Target,
    pub steps: Vec<Step>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub results: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Validate a spec into a fresh `draft` document
    pub fn from_spec(spec: WorkflowSpec) -> Result<Self> {
        let name = validate_name(&spec.name)?;
        let steps = validate_steps(spec.steps)?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description: spec.description,
            tags: spec.tags,
            target: spec.target,
            steps,
            status: WorkflowStatus::Draft,
            current_step: 0,
            results: Vec::new(),
            error: None,
            template_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            paused_at: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::Running
    }

    /// Apply a partial update (caller checks the workflow is not running)
    pub fn apply_patch(&mut self, patch: WorkflowPatch) -> Result<()> {
        // validate everything before touching the document
        let name = patch.name.as_deref().map(validate_name).transpose()?;
        let steps = patch.steps.map(validate_steps).transpose()?;
        if let Some(status) = patch.status {
            if !matches!(status, WorkflowStatus::Draft | WorkflowStatus::Ready) {
                return Err(OpflowError::Validation {
                    reason: format!("status can only be set to draft or ready, not {}", status),
                });
            }
            if !matches!(self.status, WorkflowStatus::Draft | WorkflowStatus::Ready)
                && steps.is_none()
            {
                return Err(OpflowError::conflict(
                    &self.id,
                    "update",
                    format!("status cannot be changed from {}", self.status),
                ));
            }
        }

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(target) = patch.target {
            self.target = target;
        }
        if let Some(steps) = steps {
            self.steps = steps;
            if self.status.has_run_state() {
                self.reset_run_state();
                self.status = WorkflowStatus::Draft;
            }
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        Ok(())
    }

    /// Copy as a new `draft` document with fresh ids and no run-state
    pub fn duplicate(&self) -> Self {
        let now = Utc::now();
        let steps = self
            .steps
            .iter()
            .map(|step| Step {
                id: uuid::Uuid::new_v4().to_string(),
                ..step.clone()
            })
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("{} (Copy)", self.name),
            description: self.description.clone(),
            tags: self.tags.clone(),
            target: self.target.clone(),
            steps,
            status: WorkflowStatus::Draft,
            current_step: 0,
            results: Vec::new(),
            error: None,
            template_id: self.template_id.clone(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            paused_at: None,
        }
    }

    /// Clear results, error, position and run timestamps
    pub fn reset_run_state(&mut self) {
        self.current_step = 0;
        self.results.clear();
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        self.paused_at = None;
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OpflowError::Validation {
            reason: "workflow name must not be blank".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
