//! Mock target provider
//!
//! Answers every call without touching a real target. Replies can be
//! scripted per command text or module path; everything else succeeds
//! with a canned output. All calls are recorded for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::TargetProvider;
use crate::ast::{ModuleKind, StepOptions, Target};

/// Scripted reply for a command or module
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Output(String),
    Error(String),
    /// Succeed after a delay
    Delayed(Duration, String),
    /// Never return (exercises timeouts and cancellation)
    Hang,
    Panic(String),
}

/// A recorded provider call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    StartJob {
        kind: ModuleKind,
        module: String,
        options: StepOptions,
    },
    RunModule {
        kind: ModuleKind,
        module: String,
        options: StepOptions,
    },
    SendCommand {
        session: Option<u32>,
        command: String,
    },
}

impl ProviderCall {
    /// Module path or command text
    pub fn subject(&self) -> &str {
        match self {
            Self::StartJob { module, .. } | Self::RunModule { module, .. } => module,
            Self::SendCommand { command, .. } => command,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    replies: Arc<Mutex<HashMap<String, MockReply>>>,
    calls: Arc<Mutex<Vec<ProviderCall>>>,
    next_job: Arc<AtomicU64>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reply for a command text or module path
    pub fn with_reply(self, subject: impl Into<String>, reply: MockReply) -> Self {
        self.set_reply(subject, reply);
        self
    }

    pub fn set_reply(&self, subject: impl Into<String>, reply: MockReply) {
        self.replies.lock().insert(subject.into(), reply);
    }

    /// Shorthand: make a command or module fail with `error`
    pub fn failing(self, subject: impl Into<String>, error: impl Into<String>) -> Self {
        self.with_reply(subject, MockReply::Error(error.into()))
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    /// Subjects of all calls, in call order
    pub fn subjects(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.subject().to_string()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn respond(&self, subject: &str, call: ProviderCall, default: String) -> Result<String> {
        self.calls.lock().push(call);
        let reply = self.replies.lock().get(subject).cloned();
        match reply {
            None => Ok(default),
            Some(MockReply::Output(out)) => Ok(out),
            Some(MockReply::Error(err)) => Err(anyhow!(err)),
            Some(MockReply::Delayed(delay, out)) => {
                tokio::time::sleep(delay).await;
                Ok(out)
            }
            Some(MockReply::Hang) => futures::future::pending().await,
            Some(MockReply::Panic(msg)) => panic!("{}", msg),
        }
    }
}

#[async_trait]
impl TargetProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_job(
        &self,
        kind: ModuleKind,
        module: &str,
        options: &StepOptions,
        _target: &Target,
    ) -> Result<String> {
        let job_id = self.next_job.fetch_add(1, Ordering::SeqCst).to_string();
        let call = ProviderCall::StartJob {
            kind,
            module: module.to_string(),
            options: options.clone(),
        };
        self.respond(module, call, job_id).await
    }

    async fn run_module(
        &self,
        kind: ModuleKind,
        module: &str,
        options: &StepOptions,
        _target: &Target,
    ) -> Result<String> {
        let call = ProviderCall::RunModule {
            kind,
            module: module.to_string(),
            options: options.clone(),
        };
        let default = format!("[mock] {}/{} completed", kind, module);
        self.respond(module, call, default).await
    }

    async fn send_command(
        &self,
        target: &Target,
        command: &str,
        _read_window: Duration,
    ) -> Result<String> {
        let call = ProviderCall::SendCommand {
            session: target.session,
            command: command.to_string(),
        };
        let default = format!("[mock] {}", command);
        self.respond(command, call, default).await
    }
}
