//! Step Executor - runs one step against the target provider
//!
//! Never returns an error: provider failures, timeouts, panics and stop
//! requests all come back as a failed `StepOutcome`. Every wait races the
//! run's cancellation token.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::ast::{ModuleKind, Step, StepAction, StepOutcome, Target, STOPPED};
use crate::config::{ExecutionLimits, StepDefaults};
use crate::error::OpflowError;
use crate::provider::TargetProvider;

/// Stateless step dispatcher (cheap to clone)
#[derive(Clone)]
pub struct StepExecutor {
    provider: Arc<dyn TargetProvider>,
    limits: ExecutionLimits,
    defaults: Arc<StepDefaults>,
}

impl StepExecutor {
    pub fn new(
        provider: Arc<dyn TargetProvider>,
        limits: ExecutionLimits,
        defaults: StepDefaults,
    ) -> Self {
        Self {
            provider,
            limits,
            defaults: Arc::new(defaults),
        }
    }

    /// Execute one step
    #[instrument(skip(self, step, target, cancel), fields(step = %step.name, kind = %step.kind()))]
    pub async fn execute(
        &self,
        step: &Step,
        target: &Target,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        if cancel.is_cancelled() {
            return StepOutcome::stopped();
        }
        debug!("Executing step");

        let outcome = match &step.action {
            StepAction::Delay { delay_seconds } => self.delay(*delay_seconds, cancel).await,
            StepAction::Command { command } => self.command(command, target, cancel).await,
            StepAction::Exploit { module } => self.exploit(step, module, target, cancel).await,
            StepAction::Auxiliary { module } => {
                self.module(step, ModuleKind::Auxiliary, module, target, cancel)
                    .await
            }
            StepAction::Post { module } => {
                self.module(step, ModuleKind::Post, module, target, cancel)
                    .await
            }
        };

        if let Some(error) = &outcome.error {
            warn!(error = %error, "Step failed");
        }
        outcome
    }

    async fn delay(&self, seconds: u64, cancel: &CancellationToken) -> StepOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => StepOutcome::stopped(),
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                StepOutcome::success(format!("Waited {} seconds", seconds))
            }
        }
    }

    async fn command(
        &self,
        command: &str,
        target: &Target,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        if target.session.is_none() {
            return StepOutcome::failed("no target session specified");
        }
        let call = self
            .provider
            .send_command(target, command, self.limits.command_read_window);
        let operation = format!("command '{}'", command);
        into_outcome(guarded(call, operation, self.limits.command_timeout, cancel).await)
    }

    async fn exploit(
        &self,
        step: &Step,
        module: &str,
        target: &Target,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let options = step.merged_options(self.defaults.for_kind(ModuleKind::Exploit), target);
        let call = self
            .provider
            .start_job(ModuleKind::Exploit, module, &options, target);
        let operation = format!("exploit/{}", module);
        match guarded(call, operation, self.limits.job_start_timeout, cancel).await {
            Ok(job_id) if job_id.trim().is_empty() => {
                StepOutcome::failed(format!("exploit/{} did not start a job", module))
            }
            Ok(job_id) => StepOutcome::success(format!("job {} started", job_id.trim())),
            Err(error) => StepOutcome::failed(error),
        }
    }

    async fn module(
        &self,
        step: &Step,
        kind: ModuleKind,
        module: &str,
        target: &Target,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let options = step.merged_options(self.defaults.for_kind(kind), target);
        let call = self.provider.run_module(kind, module, &options, target);
        let operation = format!("{}/{}", kind, module);
        into_outcome(guarded(call, operation, self.limits.module_timeout, cancel).await)
    }
}

fn into_outcome(result: Result<String, String>) -> StepOutcome {
    match result {
        Ok(output) => StepOutcome::success(output),
        Err(error) => StepOutcome::failed(error),
    }
}

/// Run a provider call bounded by `limit`, observing `cancel`, catching panics
async fn guarded<F>(
    call: F,
    operation: String,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<String, String>
where
    F: Future<Output = anyhow::Result<String>>,
{
    let call = AssertUnwindSafe(call).catch_unwind();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(STOPPED.to_string()),
        res = tokio::time::timeout(limit, call) => match res {
            Err(_) => Err(OpflowError::Timeout {
                operation,
                duration_ms: limit.as_millis() as u64,
            }
            .to_string()),
            Ok(Err(panic)) => Err(format!("provider panicked: {}", panic_message(&*panic))),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Ok(Ok(output))) => Ok(output),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StepSpec, StepStatus};
    use crate::provider::{MockProvider, MockReply, ProviderCall};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn executor(mock: &MockProvider) -> StepExecutor {
        let limits = ExecutionLimits {
            module_timeout: Duration::from_secs(5),
            job_start_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            command_read_window: Duration::from_millis(10),
        };
        StepExecutor::new(Arc::new(mock.clone()), limits, StepDefaults::default())
    }

    fn step(spec: StepSpec) -> Step {
        Step::from_spec(0, spec).unwrap()
    }

    // ═══════════════════════════════════════════
    // DELAY
    // ═══════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn delay_waits_then_succeeds() {
        let mock = MockProvider::new();
        let outcome = executor(&mock)
            .execute(&step(StepSpec::delay("wait", 3)), &Target::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome, StepOutcome::success("Waited 3 seconds"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_interrupted_by_cancel() {
        let mock = MockProvider::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = executor(&mock)
            .execute(&step(StepSpec::delay("long", 3600)), &Target::default(), &cancel)
            .await;
        assert_eq!(outcome.error.as_deref(), Some(STOPPED));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn already_cancelled_does_nothing() {
        let mock = MockProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = executor(&mock)
            .execute(&step(StepSpec::command("id", "id")), &Target::session(1), &cancel)
            .await;
        assert_eq!(outcome, StepOutcome::stopped());
        assert_eq!(mock.call_count(), 0);
    }

    // ═══════════════════════════════════════════
    // COMMAND
    // ═══════════════════════════════════════════

    #[tokio::test]
    async fn command_requires_session() {
        let mock = MockProvider::new();
        let outcome = executor(&mock)
            .execute(
                &step(StepSpec::command("id", "id")),
                &Target::host("10.0.0.1"),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.error.as_deref(), Some("no target session specified"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn command_error_text_is_kept() {
        let mock = MockProvider::new().failing("whoami", "broken pipe");
        let outcome = executor(&mock)
            .execute(
                &step(StepSpec::command("who", "whoami")),
                &Target::session(1),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("broken pipe"));
    }

    #[tokio::test(start_paused = true)]
    async fn command_times_out() {
        let mock = MockProvider::new().with_reply("shell", MockReply::Hang);
        let outcome = executor(&mock)
            .execute(
                &step(StepSpec::command("shell", "shell")),
                &Target::session(1),
                &CancellationToken::new(),
            )
            .await;
        let error = outcome.error.unwrap();
        assert!(error.contains("OPF-041"), "{}", error);
        assert!(error.contains("timed out"));
    }

    // ═══════════════════════════════════════════
    // MODULES
    // ═══════════════════════════════════════════

    #[tokio::test]
    async fn exploit_reports_job_and_merged_options() {
        let mock = MockProvider::new();
        let spec = StepSpec::module(ModuleKind::Exploit, "eternalblue", "windows/smb/ms17_010_eternalblue")
            .with_option("LPORT", 4444);
        let outcome = executor(&mock)
            .execute(&step(spec), &Target::host("10.0.0.9"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, StepOutcome::success("job 0 started"));

        match &mock.calls()[0] {
            ProviderCall::StartJob { options, .. } => {
                assert_eq!(options["RHOSTS"], json!("10.0.0.9"));
                assert_eq!(options["LPORT"], json!(4444));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn exploit_without_job_id_fails() {
        let mock = MockProvider::new()
            .with_reply("unix/ftp/vsftpd_234_backdoor", MockReply::Output(String::new()));
        let spec = StepSpec::module(ModuleKind::Exploit, "vsftpd", "unix/ftp/vsftpd_234_backdoor");
        let outcome = executor(&mock)
            .execute(&step(spec), &Target::host("10.0.0.9"), &CancellationToken::new())
            .await;
        assert!(outcome.error.unwrap().contains("did not start a job"));
    }

    #[tokio::test]
    async fn post_module_gets_session_option() {
        let mock = MockProvider::new();
        let spec = StepSpec::module(ModuleKind::Post, "Hashdump", "windows/gather/hashdump");
        let outcome = executor(&mock)
            .execute(&step(spec), &Target::session(7), &CancellationToken::new())
            .await;
        assert!(outcome.is_success());
        match &mock.calls()[0] {
            ProviderCall::RunModule { kind, options, .. } => {
                assert_eq!(*kind, ModuleKind::Post);
                assert_eq!(options["SESSION"], json!("7"));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn module_timeout_fails_step() {
        let mock = MockProvider::new().with_reply("scanner/portscan/tcp", MockReply::Hang);
        let spec = StepSpec::module(ModuleKind::Auxiliary, "scan", "scanner/portscan/tcp");
        let outcome = executor(&mock)
            .execute(&step(spec), &Target::host("10.0.0.0/24"), &CancellationToken::new())
            .await;
        let error = outcome.error.unwrap();
        assert!(error.contains("auxiliary/scanner/portscan/tcp"), "{}", error);
        assert!(error.contains("5000ms"));
    }

    #[tokio::test]
    async fn provider_panic_becomes_failure() {
        let mock = MockProvider::new()
            .with_reply("linux/gather/checkvm", MockReply::Panic("rpc decoder exploded".into()));
        let spec = StepSpec::module(ModuleKind::Post, "vm", "linux/gather/checkvm");
        let outcome = executor(&mock)
            .execute(&step(spec), &Target::session(1), &CancellationToken::new())
            .await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("provider panicked: rpc decoder exploded")
        );
    }
}
