//! WorkflowStore - CRUD over workflow documents
//!
//! Every mutation is a whole-document read-modify-write under a per-id
//! async lock. Reads go straight to the backend; backends write whole
//! documents atomically.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ast::{
    find_template, TemplateRequest, Workflow, WorkflowPatch, WorkflowSpec, WorkflowStatus,
};
use crate::error::{OpflowError, Result};

use super::persistence::Persistence;

#[derive(Clone)]
pub struct WorkflowStore {
    backend: Arc<dyn Persistence>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for WorkflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStore")
            .field("backend", &self.backend.name())
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl WorkflowStore {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate and persist a new `draft` workflow
    pub async fn create(&self, spec: WorkflowSpec) -> Result<Workflow> {
        let workflow = Workflow::from_spec(spec)?;
        self.backend.save(&workflow).await?;
        debug!(workflow_id = %workflow.id, "Workflow created");
        Ok(workflow)
    }

    pub async fn create_from_template(
        &self,
        template_id: &str,
        request: TemplateRequest,
    ) -> Result<Workflow> {
        let workflow = find_template(template_id)?.instantiate(request)?;
        self.backend.save(&workflow).await?;
        debug!(workflow_id = %workflow.id, template_id, "Workflow created from template");
        Ok(workflow)
    }

    pub async fn get(&self, id: &str) -> Result<Workflow> {
        self.backend
            .load(id)
            .await?
            .ok_or_else(|| OpflowError::NotFound { id: id.to_string() })
    }

    /// All workflows (optionally by status), newest first
    pub async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>> {
        let mut docs = self.backend.list().await?;
        if let Some(status) = status {
            docs.retain(|wf| wf.status == status);
        }
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    /// Atomic read-modify-write of one document
    ///
    /// The closure works on a copy; nothing is written if it fails or leaves
    /// the document unchanged. A change bumps `updated_at`. Returns the
    /// document as stored together with the closure's value.
    pub async fn mutate<T, F>(&self, id: &str, f: F) -> Result<(Workflow, T)>
    where
        F: FnOnce(&mut Workflow) -> Result<T>,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let current = self.get(id).await?;
        let mut next = current.clone();
        let value = f(&mut next)?;
        if next != current {
            next.updated_at = Utc::now();
            self.backend.save(&next).await?;
        }
        Ok((next, value))
    }

    /// Partial update; refused while running
    pub async fn update(&self, id: &str, patch: WorkflowPatch) -> Result<Workflow> {
        let (workflow, ()) = self
            .mutate(id, |wf| {
                if wf.is_running() {
                    return Err(OpflowError::conflict(&wf.id, "update", "workflow is running"));
                }
                wf.apply_patch(patch)
            })
            .await?;
        Ok(workflow)
    }

    /// Delete; refused while running
    pub async fn delete(&self, id: &str) -> Result<Workflow> {
        let lock = self.lock_for(id);
        let removed = {
            let _guard = lock.lock().await;
            let workflow = self.get(id).await?;
            if workflow.is_running() {
                return Err(OpflowError::conflict(id, "delete", "workflow is running"));
            }
            self.backend.remove(id).await?;
            workflow
        };
        self.locks.remove(id);
        debug!(workflow_id = %id, "Workflow deleted");
        Ok(removed)
    }

    /// Copy into a new `draft` workflow; the original is untouched
    pub async fn duplicate(&self, id: &str) -> Result<Workflow> {
        let copy = self.get(id).await?.duplicate();
        self.backend.save(&copy).await?;
        debug!(source = %id, workflow_id = %copy.id, "Workflow duplicated");
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StepSpec, Target};
    use crate::store::MemoryPersistence;
    use pretty_assertions::assert_eq;

    fn store() -> WorkflowStore {
        WorkflowStore::new(Arc::new(MemoryPersistence::new()))
    }

    fn spec(name: &str) -> WorkflowSpec {
        WorkflowSpec::new(name)
            .with_target(Target::session(1))
            .with_step(StepSpec::command("Get User ID", "getuid"))
    }

    #[tokio::test]
    async fn create_rejects_invalid_without_persisting() {
        let store = store();
        let bad = WorkflowSpec::new("bad").with_step(StepSpec::command("empty", " "));
        assert!(store.create(bad).await.unwrap_err().is_validation());
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let err = store().get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filters() {
        let store = store();
        let first = store.create(spec("first")).await.unwrap();
        let second = store.create(spec("second")).await.unwrap();
        store
            .update(
                &second.id,
                WorkflowPatch {
                    status: Some(WorkflowStatus::Ready),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at >= all[1].created_at);

        let drafts = store.list(Some(WorkflowStatus::Draft)).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, first.id);
    }

    #[tokio::test]
    async fn mutate_skips_write_when_unchanged() {
        let store = store();
        let wf = store.create(spec("noop")).await.unwrap();
        let (after, ()) = store.mutate(&wf.id, |_| Ok(())).await.unwrap();
        assert_eq!(after.updated_at, wf.updated_at);

        let (after, ()) = store
            .mutate(&wf.id, |doc| {
                doc.description = "changed".into();
                Ok(())
            })
            .await
            .unwrap();
        assert!(after.updated_at >= wf.updated_at);
        assert_eq!(store.get(&wf.id).await.unwrap().description, "changed");
    }

    #[tokio::test]
    async fn failed_mutation_is_not_persisted() {
        let store = store();
        let wf = store.create(spec("atomic")).await.unwrap();
        let err = store
            .mutate(&wf.id, |doc| -> Result<()> {
                doc.name = "half-applied".into();
                Err(OpflowError::Validation {
                    reason: "nope".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.get(&wf.id).await.unwrap().name, "atomic");
    }

    #[tokio::test]
    async fn update_and_delete_refused_while_running() {
        let store = store();
        let wf = store.create(spec("busy")).await.unwrap();
        store
            .mutate(&wf.id, |doc| {
                doc.status = WorkflowStatus::Running;
                Ok(())
            })
            .await
            .unwrap();

        let err = store
            .update(
                &wf.id,
                WorkflowPatch {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.delete(&wf.id).await.unwrap_err().is_conflict());
        assert_eq!(store.get(&wf.id).await.unwrap().name, "busy");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = store();
        let wf = store.create(spec("gone")).await.unwrap();
        store.delete(&wf.id).await.unwrap();
        assert!(store.get(&wf.id).await.unwrap_err().is_not_found());
        assert!(store.delete(&wf.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn duplicate_leaves_original_untouched() {
        let store = store();
        let wf = store.create(spec("orig")).await.unwrap();
        let copy = store.duplicate(&wf.id).await.unwrap();
        assert_eq!(copy.name, "orig (Copy)");
        assert_eq!(store.get(&wf.id).await.unwrap(), wf);
        assert_eq!(store.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_from_template_persists() {
        let store = store();
        let wf = store
            .create_from_template(
                "credential_harvest",
                TemplateRequest {
                    name: None,
                    target: Target::session(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Ready);
        assert_eq!(store.get(&wf.id).await.unwrap().steps.len(), 3);

        let err = store
            .create_from_template("nope", TemplateRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OPF-021");
    }
}
