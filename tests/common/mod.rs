//! Test fixtures and helpers
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use opflow::error::{OpflowError, Result};
use opflow::{Engine, MemoryPersistence, MockProvider, OpflowConfig, Persistence, Workflow};

/// Generous upper bound for a run to settle (virtual time in paused tests)
pub const SETTLE: Duration = Duration::from_secs(3_600);

/// In-memory engine plus a handle on its mock provider
pub fn engine() -> (Engine, MockProvider) {
    engine_with(MockProvider::new())
}

pub fn engine_with(mock: MockProvider) -> (Engine, MockProvider) {
    let engine = Engine::in_memory(Arc::new(mock.clone()));
    (engine, mock)
}

/// Poll until `check` holds for the stored workflow
pub async fn wait_for(engine: &Engine, id: &str, check: impl Fn(&Workflow) -> bool) -> Workflow {
    for _ in 0..100_000 {
        let workflow = engine.get_workflow(id).await.unwrap();
        if check(&workflow) {
            return workflow;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never held for workflow {}", id);
}

/// Wait until step `index` has a `running` result
pub async fn wait_for_step(engine: &Engine, id: &str, index: usize) -> Workflow {
    wait_for(engine, id, |wf| {
        wf.results.get(index).is_some_and(|r| r.is_running())
    })
    .await
}

/// Memory backend that fails one chosen save
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    saves: AtomicUsize,
    fail_at: AtomicUsize,
}

impl FlakyPersistence {
    pub fn new() -> Self {
        Self {
            inner: MemoryPersistence::new(),
            saves: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(0),
        }
    }

    /// Fail the `n`-th save from now (1-based)
    pub fn fail_nth_save(&self, n: usize) {
        let done = self.saves.load(Ordering::SeqCst);
        self.fail_at.store(done + n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for FlakyPersistence {
    async fn load(&self, id: &str) -> Result<Option<Workflow>> {
        self.inner.load(id).await
    }

    async fn save(&self, workflow: &Workflow) -> Result<()> {
        let count = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if count == self.fail_at.load(Ordering::SeqCst) {
            return Err(OpflowError::storage("disk full"));
        }
        self.inner.save(workflow).await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        self.inner.list().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Engine over a flaky backend
pub fn flaky_engine(mock: MockProvider) -> (Engine, Arc<FlakyPersistence>) {
    let backend = Arc::new(FlakyPersistence::new());
    let engine = Engine::new(
        backend.clone(),
        Arc::new(mock),
        &OpflowConfig::default(),
    );
    (engine, backend)
}

/// Minimal workflow YAML used by CLI tests
pub fn recon_workflow_yaml() -> &'static str {
    r#"
name: Quick recon
steps:
  - type: command
    name: Get User ID
    command: getuid
  - type: delay
    delay_seconds: 0
  - type: post
    name: Check VM
    module: linux/gather/checkvm
"#
}
