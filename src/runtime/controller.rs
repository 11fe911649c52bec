//! Run Controller - workflow state machine and background step loop
//!
//! One tokio task per running workflow. Control calls only flip signals or
//! check-and-set status under the store's per-document lock:
//! - the run handle is registered inside the same locked mutation that sets
//!   `running`, so two concurrent `run()` calls cannot both spawn
//! - the loop's final write and the handle removal also share one mutation
//!
//! Results are written strictly in step order; a partial result at the
//! resume index is overwritten, never appended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, Instrument};

use crate::ast::{Step, StepResult, StepStatus, Target, Workflow, WorkflowStatus};
use crate::error::{OpflowError, Result};
use crate::event::{ActivityEntry, ActivityKind, ActivityLog};
use crate::store::WorkflowStore;

use super::executor::StepExecutor;

/// Error recorded when a run is stopped
pub const STOPPED_BY_USER: &str = "stopped by user";

/// Signal sent to a running loop but not yet observed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingSignal {
    Pause,
    Stop,
}

/// Result of a run-control call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub pending: Option<PendingSignal>,
}

/// Signals shared between control calls and one run's loop
#[derive(Debug, Default)]
struct RunSignals {
    pause: AtomicBool,
    stop: CancellationToken,
}

impl RunSignals {
    fn request_pause(&self) -> PendingSignal {
        if self.stop.is_cancelled() {
            return PendingSignal::Stop;
        }
        self.pause.store(true, Ordering::SeqCst);
        PendingSignal::Pause
    }

    /// Stop wins over a pending pause
    fn request_stop(&self) -> PendingSignal {
        self.pause.store(false, Ordering::SeqCst);
        self.stop.cancel();
        PendingSignal::Stop
    }

    fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }
}

/// How the loop left the step sequence
#[derive(Debug)]
enum Exit {
    Paused(usize),
    Stopped(usize),
    Failed(usize, String),
    Completed(usize),
}

#[derive(Clone)]
pub struct RunController {
    store: WorkflowStore,
    executor: StepExecutor,
    activity: ActivityLog,
    runs: Arc<DashMap<String, Arc<RunSignals>>>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("active_runs", &self.runs.len())
            .finish()
    }
}

impl RunController {
    pub fn new(store: WorkflowStore, executor: StepExecutor, activity: ActivityLog) -> Self {
        Self {
            store,
            executor,
            activity,
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Is a background task currently driving this workflow?
    pub fn is_active(&self, id: &str) -> bool {
        self.runs.contains_key(id)
    }

    // ═══════════════════════════════════════════
    // CONTROL CALLS
    // ═══════════════════════════════════════════

    /// Start (draft/ready) or resume (paused) a workflow in the background
    #[instrument(skip(self))]
    pub async fn run(&self, id: &str) -> Result<ControlOutcome> {
        let signals = Arc::new(RunSignals::default());
        let runs = Arc::clone(&self.runs);
        let handle = Arc::clone(&signals);

        let mutation = self
            .store
            .mutate(id, move |wf| {
                if runs.contains_key(&wf.id) {
                    return Err(OpflowError::conflict(&wf.id, "run", "a run is already active"));
                }
                if wf.status.is_terminal() {
                    return Err(OpflowError::conflict(
                        &wf.id,
                        "run",
                        format!("workflow already {}; duplicate it to run again", wf.status),
                    ));
                }
                if !wf.status.can_run() {
                    return Err(OpflowError::conflict(
                        &wf.id,
                        "run",
                        format!("workflow is {}", wf.status),
                    ));
                }
                let resumed = wf.status == WorkflowStatus::Paused;
                if !resumed {
                    if wf.steps.is_empty() {
                        return Err(OpflowError::Validation {
                            reason: format!("workflow '{}' has no steps to run", wf.id),
                        });
                    }
                    wf.reset_run_state();
                    wf.started_at = Some(Utc::now());
                }
                wf.status = WorkflowStatus::Running;
                wf.error = None;
                wf.paused_at = None;
                runs.insert(wf.id.clone(), handle);
                Ok(resumed)
            })
            .await;

        let (workflow, resumed) = match mutation {
            Ok(done) => done,
            Err(e) => {
                // the closure may have registered before the save failed
                self.runs.remove_if(id, |_, v| Arc::ptr_eq(v, &signals));
                return Err(e);
            }
        };

        let (kind, verb) = if resumed {
            (ActivityKind::WorkflowResumed, "resumed")
        } else {
            (ActivityKind::WorkflowStarted, "started")
        };
        self.activity.record(
            ActivityEntry::new(
                kind,
                format!(
                    "Workflow '{}' {} at step {}/{}",
                    workflow.name,
                    verb,
                    workflow.current_step + 1,
                    workflow.steps.len()
                ),
            )
            .workflow(&workflow.id)
            .session(workflow.target.session),
        );
        info!(workflow_id = %workflow.id, resumed, "Run spawned");

        let span = tracing::info_span!("run", workflow_id = %workflow.id);
        let controller = self.clone();
        let outcome = ControlOutcome {
            workflow_id: workflow.id.clone(),
            status: WorkflowStatus::Running,
            pending: None,
        };
        tokio::spawn(
            async move {
                let start = workflow.current_step;
                controller
                    .drive(workflow.id, workflow.steps, workflow.target, start, signals)
                    .await;
            }
            .instrument(span),
        );
        Ok(outcome)
    }

    /// Ask a running workflow to pause before its next step
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<ControlOutcome> {
        let runs = Arc::clone(&self.runs);
        let (workflow, pending) = self
            .store
            .mutate(id, move |wf| match wf.status {
                WorkflowStatus::Running => match runs.get(&wf.id) {
                    Some(signals) => Ok(Some(signals.request_pause())),
                    None => {
                        // no task owns this run any more
                        wf.status = WorkflowStatus::Paused;
                        wf.paused_at = Some(Utc::now());
                        Ok(None)
                    }
                },
                other => Err(OpflowError::conflict(
                    &wf.id,
                    "pause",
                    format!("workflow is {}", other),
                )),
            })
            .await?;

        if pending.is_none() {
            self.record_settled(&workflow, ActivityKind::WorkflowPaused);
        }
        Ok(ControlOutcome {
            workflow_id: workflow.id,
            status: workflow.status,
            pending,
        })
    }

    /// Stop a running or paused workflow; it ends `failed`
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &str) -> Result<ControlOutcome> {
        let runs = Arc::clone(&self.runs);
        let (workflow, pending) = self
            .store
            .mutate(id, move |wf| match wf.status {
                WorkflowStatus::Running => match runs.get(&wf.id) {
                    Some(signals) => Ok(Some(signals.request_stop())),
                    None => {
                        fail_in_place(wf, STOPPED_BY_USER.to_string());
                        Ok(None)
                    }
                },
                WorkflowStatus::Paused => {
                    fail_in_place(wf, STOPPED_BY_USER.to_string());
                    Ok(None)
                }
                other => Err(OpflowError::conflict(
                    &wf.id,
                    "stop",
                    format!("workflow is {}", other),
                )),
            })
            .await?;

        if pending.is_none() {
            self.record_settled(&workflow, ActivityKind::WorkflowStopped);
        }
        Ok(ControlOutcome {
            workflow_id: workflow.id,
            status: workflow.status,
            pending,
        })
    }

    /// Move `running` documents with no owning task in this process to
    /// `paused`
    ///
    /// Only safe when no other process drives runs on the same store, so it
    /// is an explicit operator action rather than part of opening a store.
    pub async fn recover(&self) -> Result<usize> {
        let stale = self.store.list(Some(WorkflowStatus::Running)).await?;
        let mut recovered = 0;
        for candidate in stale {
            if self.is_active(&candidate.id) {
                continue;
            }
            let runs = Arc::clone(&self.runs);
            let (workflow, changed) = self
                .store
                .mutate(&candidate.id, move |wf| {
                    if wf.status != WorkflowStatus::Running || runs.contains_key(&wf.id) {
                        return Ok(false);
                    }
                    wf.status = WorkflowStatus::Paused;
                    wf.paused_at = Some(Utc::now());
                    // a step interrupted mid-flight is re-run on resume
                    if wf.results.last().is_some_and(StepResult::is_running) {
                        wf.results.pop();
                    }
                    Ok(true)
                })
                .await?;
            if changed {
                recovered += 1;
                self.record_settled(&workflow, ActivityKind::WorkflowPaused);
            }
        }
        if recovered > 0 {
            info!(recovered, "Recovered interrupted runs as paused");
        }
        Ok(recovered)
    }

    // ═══════════════════════════════════════════
    // BACKGROUND LOOP
    // ═══════════════════════════════════════════

    async fn drive(
        self,
        id: String,
        steps: Vec<Step>,
        target: Target,
        start: usize,
        signals: Arc<RunSignals>,
    ) {
        let settled = match self.run_steps(&id, &steps, &target, start, &signals).await {
            Ok(exit) => self.settle(&id, &signals, exit).await,
            Err(e) => Err(e),
        };

        if let Err(e) = settled {
            error!(workflow_id = %id, error = %e, "Run aborted by storage failure");
            let reason = format!("storage error: {}", e);
            let runs = Arc::clone(&self.runs);
            let handle = Arc::clone(&signals);
            let last_try = self
                .store
                .mutate(&id, move |wf| {
                    runs.remove_if(&wf.id, |_, v| Arc::ptr_eq(v, &handle));
                    fail_in_place(wf, reason);
                    Ok(())
                })
                .await;
            // whatever happened, this task no longer owns the run
            self.runs.remove_if(&id, |_, v| Arc::ptr_eq(v, &signals));
            match last_try {
                Ok((workflow, ())) => self.record_settled(&workflow, ActivityKind::WorkflowFailed),
                Err(e) => error!(workflow_id = %id, error = %e, "Could not record failed run"),
            }
        }
    }

    async fn run_steps(
        &self,
        id: &str,
        steps: &[Step],
        target: &Target,
        start: usize,
        signals: &RunSignals,
    ) -> Result<Exit> {
        for (index, step) in steps.iter().enumerate().skip(start) {
            if signals.pause_requested() {
                return Ok(Exit::Paused(index));
            }
            if signals.stop.is_cancelled() {
                return Ok(Exit::Stopped(index));
            }

            self.store
                .mutate(id, |wf| {
                    owned_by_loop(wf)?;
                    if wf.results.len() < index {
                        return Err(OpflowError::storage(format!(
                            "workflow '{}' lost results before step {}",
                            wf.id,
                            index + 1
                        )));
                    }
                    wf.current_step = index;
                    wf.results.truncate(index);
                    wf.results.push(StepResult::started(index, step));
                    Ok(())
                })
                .await?;
            self.activity.record(
                ActivityEntry::new(
                    ActivityKind::StepStarted,
                    format!("Step {} '{}' started", index + 1, step.name),
                )
                .workflow(id)
                .step(index)
                .session(target.session),
            );

            let outcome = self.executor.execute(step, target, &signals.stop).await;
            let status = outcome.status;
            let error = outcome.error.clone();
            let advances = outcome.is_success() || step.continue_on_fail;

            self.store
                .mutate(id, |wf| {
                    owned_by_loop(wf)?;
                    match wf.results.get_mut(index).filter(|r| r.is_running()) {
                        Some(result) => result.finish(outcome),
                        None => {
                            return Err(OpflowError::storage(format!(
                                "workflow '{}' has no running result for step {}",
                                wf.id,
                                index + 1
                            )))
                        }
                    }
                    if advances {
                        wf.current_step = index + 1;
                    }
                    Ok(())
                })
                .await?;
            self.record_step(id, index, step, target, status, error.as_deref());

            if signals.stop.is_cancelled() {
                return Ok(Exit::Stopped(index));
            }
            if status == StepStatus::Failed && !step.continue_on_fail {
                let error = error.unwrap_or_else(|| format!("step '{}' failed", step.name));
                return Ok(Exit::Failed(index, error));
            }
        }
        Ok(Exit::Completed(steps.len()))
    }

    /// Persist the final state and release the run handle in one mutation
    async fn settle(&self, id: &str, signals: &Arc<RunSignals>, exit: Exit) -> Result<()> {
        let runs = Arc::clone(&self.runs);
        let handle = Arc::clone(signals);
        let (workflow, kind) = self
            .store
            .mutate(id, move |wf| {
                owned_by_loop(wf)?;
                let now = Utc::now();
                let kind = match exit {
                    Exit::Paused(index) => {
                        wf.status = WorkflowStatus::Paused;
                        wf.current_step = index;
                        wf.paused_at = Some(now);
                        ActivityKind::WorkflowPaused
                    }
                    Exit::Stopped(index) => {
                        wf.current_step = index;
                        fail_in_place(wf, STOPPED_BY_USER.to_string());
                        ActivityKind::WorkflowStopped
                    }
                    Exit::Failed(index, error) => {
                        wf.current_step = index;
                        fail_in_place(wf, error);
                        ActivityKind::WorkflowFailed
                    }
                    Exit::Completed(len) => {
                        wf.status = WorkflowStatus::Completed;
                        wf.current_step = len;
                        wf.completed_at = Some(now);
                        ActivityKind::WorkflowCompleted
                    }
                };
                runs.remove_if(&wf.id, |_, v| Arc::ptr_eq(v, &handle));
                Ok(kind)
            })
            .await?;

        info!(workflow_id = %id, status = %workflow.status, "Run settled");
        self.record_settled(&workflow, kind);
        Ok(())
    }

    // ═══════════════════════════════════════════
    // ACTIVITY
    // ═══════════════════════════════════════════

    fn record_step(
        &self,
        id: &str,
        index: usize,
        step: &Step,
        target: &Target,
        status: StepStatus,
        error: Option<&str>,
    ) {
        let entry = match status {
            StepStatus::Failed => ActivityEntry::new(
                ActivityKind::StepFailed,
                format!(
                    "Step {} '{}' failed: {}",
                    index + 1,
                    step.name,
                    error.unwrap_or("unknown error")
                ),
            ),
            _ => ActivityEntry::new(
                ActivityKind::StepSucceeded,
                format!("Step {} '{}' succeeded", index + 1, step.name),
            ),
        };
        self.activity
            .record(entry.workflow(id).step(index).session(target.session));
    }

    fn record_settled(&self, workflow: &Workflow, kind: ActivityKind) {
        let message = match kind {
            ActivityKind::WorkflowPaused => format!(
                "Workflow '{}' paused before step {}",
                workflow.name,
                workflow.current_step + 1
            ),
            ActivityKind::WorkflowCompleted => format!(
                "Workflow '{}' completed ({} steps)",
                workflow.name,
                workflow.results.len()
            ),
            _ => format!(
                "Workflow '{}' {}: {}",
                workflow.name,
                workflow.status,
                workflow.error.as_deref().unwrap_or("-")
            ),
        };
        self.activity.record(
            ActivityEntry::new(kind, message)
                .workflow(&workflow.id)
                .session(workflow.target.session),
        );
    }
}

/// The loop only writes documents that are still `running`
fn owned_by_loop(wf: &Workflow) -> Result<()> {
    if wf.status != WorkflowStatus::Running {
        return Err(OpflowError::storage(format!(
            "workflow '{}' became {} outside its run",
            wf.id, wf.status
        )));
    }
    Ok(())
}

/// Mark a workflow failed, closing any result left `running`
fn fail_in_place(wf: &mut Workflow, error: String) {
    if let Some(last) = wf.results.last_mut().filter(|r| r.is_running()) {
        last.status = StepStatus::Failed;
        last.error = Some(error.clone());
        last.completed_at = Some(Utc::now());
    }
    wf.status = WorkflowStatus::Failed;
    wf.error = Some(error);
    wf.completed_at = Some(Utc::now());
    wf.paused_at = None;
}
