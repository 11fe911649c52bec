//! Engine - the exposed control surface
//!
//! One cloneable handle wiring the workflow store, run controller, step
//! executor and activity log together. CRUD operations are recorded in the
//! activity log; run-control is delegated to the controller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::ast::{
    find_template, templates, Template, TemplateRequest, TemplateSummary, Workflow,
    WorkflowPatch, WorkflowSpec, WorkflowStatus,
};
use crate::config::OpflowConfig;
use crate::error::{OpflowError, Result};
use crate::event::{ActivityEntry, ActivityEvent, ActivityFilter, ActivityKind, ActivityLog};
use crate::provider::TargetProvider;
use crate::runtime::{ControlOutcome, RunController, StepExecutor};
use crate::store::{JsonDirPersistence, MemoryPersistence, Persistence, WorkflowStore};
use crate::util::SETTLE_POLL_INTERVAL;

#[derive(Clone, Debug)]
pub struct Engine {
    store: WorkflowStore,
    controller: RunController,
    activity: ActivityLog,
}

impl Engine {
    /// Wire an engine over the given backend and provider
    pub fn new(
        backend: Arc<dyn Persistence>,
        provider: Arc<dyn TargetProvider>,
        config: &OpflowConfig,
    ) -> Self {
        Self::with_activity(
            backend,
            provider,
            config,
            ActivityLog::new(config.activity.capacity),
        )
    }

    pub fn with_activity(
        backend: Arc<dyn Persistence>,
        provider: Arc<dyn TargetProvider>,
        config: &OpflowConfig,
        activity: ActivityLog,
    ) -> Self {
        let store = WorkflowStore::new(backend);
        let executor = StepExecutor::new(provider, config.limits(), config.step_defaults.clone());
        let controller = RunController::new(store.clone(), executor, activity.clone());
        Self {
            store,
            controller,
            activity,
        }
    }

    /// In-memory engine with default configuration
    pub fn in_memory(provider: Arc<dyn TargetProvider>) -> Self {
        Self::new(
            Arc::new(MemoryPersistence::new()),
            provider,
            &OpflowConfig::default(),
        )
    }

    /// Build from configuration: pick the backend and restore the activity
    /// history
    ///
    /// Opening never touches stored runs; another process may own them.
    /// Interrupted runs are picked up with [`Engine::recover`].
    pub async fn open(config: &OpflowConfig, provider: Arc<dyn TargetProvider>) -> Result<Self> {
        let backend: Arc<dyn Persistence> = match &config.storage.data_dir {
            Some(dir) => Arc::new(JsonDirPersistence::open(dir)?),
            None => Arc::new(MemoryPersistence::new()),
        };
        let activity = match &config.storage.activity_file {
            Some(path) => ActivityLog::restore(path, config.activity.capacity)?,
            None => ActivityLog::new(config.activity.capacity),
        };

        let engine = Self::with_activity(backend, provider, config, activity);
        info!(backend = engine.store.backend_name(), "Engine opened");
        Ok(engine)
    }

    // ═══════════════════════════════════════════
    // TEMPLATES
    // ═══════════════════════════════════════════

    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        templates().iter().map(Template::summary).collect()
    }

    pub fn get_template(&self, id: &str) -> Result<Template> {
        find_template(id).cloned()
    }

    // ═══════════════════════════════════════════
    // WORKFLOWS
    // ═══════════════════════════════════════════

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create_workflow(&self, spec: WorkflowSpec) -> Result<Workflow> {
        let workflow = self.store.create(spec).await?;
        self.record(
            &workflow,
            ActivityKind::WorkflowCreated,
            format!("Workflow '{}' created", workflow.name),
        );
        Ok(workflow)
    }

    #[instrument(skip(self, request))]
    pub async fn create_from_template(
        &self,
        template_id: &str,
        request: TemplateRequest,
    ) -> Result<Workflow> {
        let workflow = self.store.create_from_template(template_id, request).await?;
        self.record(
            &workflow,
            ActivityKind::WorkflowCreated,
            format!(
                "Workflow '{}' created from template {}",
                workflow.name, template_id
            ),
        );
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow> {
        self.store.get(id).await
    }

    pub async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>> {
        self.store.list(status).await
    }

    #[instrument(skip(self, patch))]
    pub async fn update_workflow(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let workflow = self.store.update(id, patch).await?;
        self.record(
            &workflow,
            ActivityKind::WorkflowUpdated,
            format!("Workflow '{}' updated", workflow.name),
        );
        Ok(workflow)
    }

    #[instrument(skip(self))]
    pub async fn delete_workflow(&self, id: &str) -> Result<()> {
        let workflow = self.store.delete(id).await?;
        self.record(
            &workflow,
            ActivityKind::WorkflowDeleted,
            format!("Workflow '{}' deleted", workflow.name),
        );
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn duplicate_workflow(&self, id: &str) -> Result<Workflow> {
        let copy = self.store.duplicate(id).await?;
        self.record(
            &copy,
            ActivityKind::WorkflowDuplicated,
            format!("Workflow '{}' duplicated from {}", copy.name, id),
        );
        Ok(copy)
    }

    // ═══════════════════════════════════════════
    // RUN CONTROL
    // ═══════════════════════════════════════════

    pub async fn run(&self, id: &str) -> Result<ControlOutcome> {
        self.controller.run(id).await
    }

    pub async fn pause(&self, id: &str) -> Result<ControlOutcome> {
        self.controller.pause(id).await
    }

    pub async fn stop(&self, id: &str) -> Result<ControlOutcome> {
        self.controller.stop(id).await
    }

    /// Park runs left `running` by a crashed process as `paused`
    ///
    /// Only call this when no other engine drives runs on the same store.
    pub async fn recover(&self) -> Result<usize> {
        self.controller.recover().await
    }

    /// Poll until the workflow is no longer `running`
    pub async fn wait_until_settled(&self, id: &str, timeout: Duration) -> Result<Workflow> {
        let poll = async {
            loop {
                let workflow = self.store.get(id).await?;
                if !workflow.is_running() {
                    return Ok::<_, OpflowError>(workflow);
                }
                tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| OpflowError::Timeout {
                operation: format!("wait for workflow '{}'", id),
                duration_ms: timeout.as_millis() as u64,
            })?
    }

    // ═══════════════════════════════════════════
    // ACTIVITY
    // ═══════════════════════════════════════════

    /// Most recent `limit` entries, newest first
    pub fn list_activity(&self, limit: usize, filter: Option<&ActivityFilter>) -> Vec<ActivityEvent> {
        match filter {
            Some(filter) => self.activity.tail(limit, filter),
            None => self.activity.tail(limit, &ActivityFilter::default()),
        }
    }

    pub fn record_activity(&self, entry: ActivityEntry) -> u64 {
        self.activity.record(entry)
    }

    pub fn clear_activity(&self) {
        self.activity.clear();
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    fn record(&self, workflow: &Workflow, kind: ActivityKind, message: String) {
        self.activity.record(
            ActivityEntry::new(kind, message)
                .workflow(&workflow.id)
                .session(workflow.target.session),
        );
    }
}
