//! # Target Provider Abstraction
//!
//! The engine never talks to a framework directly. Everything it does to a
//! remote target goes through [`TargetProvider`]:
//!
//! - `start_job`: launch a module as a background job (exploits)
//! - `run_module`: run a module to completion (auxiliary / post)
//! - `send_command`: write a command to a session and read back its output
//!
//! Implementations return `anyhow::Result`; the executor turns any error
//! (or panic) into a failed step outcome.
//!
//! | Provider | Use Case |
//! |----------|----------|
//! | `mock` | Tests and rehearsals, scriptable replies |

mod mock;

pub use mock::{MockProvider, MockReply, ProviderCall};

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::ast::{ModuleKind, StepOptions, Target};

/// Capability to act on a remote target
#[async_trait]
pub trait TargetProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Start a module as a job, returning the job id
    async fn start_job(
        &self,
        kind: ModuleKind,
        module: &str,
        options: &StepOptions,
        target: &Target,
    ) -> Result<String>;

    /// Run a module and wait for its output
    async fn run_module(
        &self,
        kind: ModuleKind,
        module: &str,
        options: &StepOptions,
        target: &Target,
    ) -> Result<String>;

    /// Send a command to the target session, collecting output for `read_window`
    async fn send_command(&self, target: &Target, command: &str, read_window: Duration)
        -> Result<String>;
}

/// Create a provider by name
pub fn create_provider(name: &str) -> Result<std::sync::Arc<dyn TargetProvider>> {
    match name {
        "mock" => Ok(std::sync::Arc::new(MockProvider::new())),
        other => anyhow::bail!("Unknown target provider: {}", other),
    }
}
