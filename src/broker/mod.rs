//! Broker module - Untrusted snippet execution
//!
//! `SandboxBroker::execute_untrusted` is the only entry point callers need:
//! 1. Materialize the snippet as a private artifact
//! 2. Prepare, create and start a sandbox instance mounting it read-only
//! 3. Wait for exit or the deadline, whichever comes first
//! 4. Classify the outcome
//! 5. Remove the instance and the artifact, on every path
//!
//! Nothing raised along the way escapes: every failure is folded into a
//! well-formed `ExecutionResult`.

mod guard;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::artifact::CodeArtifact;
use crate::config::{Backend, BrokerConfig, ResourceLimits};
use crate::core::utils::{short_digest, truncate_output};
use crate::core::Verdict;
use crate::sandbox::{
    CapturedOutput, DockerProvider, EnvironmentProvider, IsolateProvider, LaunchSpec, Mount,
    WaitStatus,
};
use guard::HandleGuard;

/// Every infrastructure diagnostic starts with this
pub const INFRASTRUCTURE_ERROR_PREFIX: &str = "Sandbox infrastructure error";

/// Slack past the deadline before the broker stops waiting on a provider
/// that has not reported the timeout itself
const WAIT_GRACE: Duration = Duration::from_millis(500);

/// What the caller gets back: nothing more, nothing less
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Stdout on success, a diagnostic on failure
    pub output: String,
}

/// Classified outcome of one invocation, for operators and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub verdict: Verdict,
    pub output: String,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    fn infrastructure(message: impl std::fmt::Display) -> Self {
        Self {
            verdict: Verdict::SystemError,
            output: format!("{}: {}", INFRASTRUCTURE_ERROR_PREFIX, message),
            elapsed_ms: 0,
        }
    }
}

impl From<ExecutionReport> for ExecutionResult {
    fn from(report: ExecutionReport) -> Self {
        Self {
            success: report.verdict.is_success(),
            output: report.output,
        }
    }
}

/// Runs untrusted snippets through an injected environment provider
pub struct SandboxBroker {
    provider: Arc<dyn EnvironmentProvider>,
    config: BrokerConfig,
}

impl std::fmt::Debug for SandboxBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBroker")
            .field("provider", &self.provider.name())
            .field("limits", &self.config.limits)
            .finish()
    }
}

impl SandboxBroker {
    pub fn new(provider: Arc<dyn EnvironmentProvider>, config: BrokerConfig) -> Self {
        Self { provider, config }
    }

    /// Build the provider named by `config.backend`
    pub fn from_config(config: BrokerConfig) -> Self {
        let provider: Arc<dyn EnvironmentProvider> = match config.backend {
            // One byte past the cap so truncation is still detected
            Backend::Docker => Arc::new(
                DockerProvider::new(config.docker.clone())
                    .with_output_limit(config.output.max_bytes.saturating_add(1)),
            ),
            Backend::Isolate => Arc::new(IsolateProvider::new(config.isolate.clone())),
        };
        Self::new(provider, config)
    }

    /// The limits `execute_untrusted` applies
    pub fn limits(&self) -> &ResourceLimits {
        &self.config.limits
    }

    /// Run `code` under the configured limits
    pub async fn execute_untrusted(&self, code: &str) -> ExecutionResult {
        self.execute_report(code, &self.config.limits).await.into()
    }

    /// Run `code` under explicitly chosen limits
    pub async fn execute_with_limits(
        &self,
        code: &str,
        limits: &ResourceLimits,
    ) -> ExecutionResult {
        if limits.is_relaxed() {
            warn!("Executing snippet with relaxed limits: {:?}", limits);
        }
        self.execute_report(code, limits).await.into()
    }

    /// Synchronous form of `execute_untrusted` for callers without a runtime
    ///
    /// Called from inside an async context it refuses to run and reports an
    /// infrastructure error.
    pub fn execute_untrusted_blocking(&self, code: &str) -> ExecutionResult {
        if tokio::runtime::Handle::try_current().is_ok() {
            error!("Blocking execution requested from inside an async runtime");
            return ExecutionReport::infrastructure(
                "blocking execution is not available inside an async runtime",
            )
            .into();
        }

        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.execute_untrusted(code)),
            Err(e) => {
                error!("Failed to build runtime for blocking execution: {}", e);
                ExecutionReport::infrastructure(format!("failed to start runtime: {}", e)).into()
            }
        }
    }

    /// Run `code` and return the classified report
    pub async fn execute_report(&self, code: &str, limits: &ResourceLimits) -> ExecutionReport {
        let started = Instant::now();
        let digest = short_digest(code);
        info!(
            "Executing snippet {} ({} bytes) on {} backend",
            digest,
            code.len(),
            self.provider.name()
        );

        let mut report = if let Err(e) = self.config.validate() {
            ExecutionReport::infrastructure(format!("invalid configuration: {:#}", e))
        } else if let Err(e) = limits.validate() {
            ExecutionReport::infrastructure(format!("invalid limits: {:#}", e))
        } else {
            self.run(code, limits).await
        };
        report.output = truncate_output(report.output, self.config.output.max_bytes);
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        if report.verdict.is_infrastructure() {
            error!("Snippet {} not executed: {}", digest, report.output);
        } else {
            info!(
                "Snippet {} finished: verdict={}, elapsed_ms={}",
                digest, report.verdict, report.elapsed_ms
            );
        }
        report
    }

    /// Steps 1 and 5 around the sandbox lifecycle: the artifact is created
    /// first and removed last
    async fn run(&self, code: &str, limits: &ResourceLimits) -> ExecutionReport {
        let artifact = match CodeArtifact::materialize(code, &self.config.runtime.artifact_name) {
            Ok(artifact) => artifact,
            Err(e) => {
                return ExecutionReport::infrastructure(format!(
                    "failed to write code artifact: {}",
                    e
                ))
            }
        };

        let report = self.run_in_sandbox(&artifact, limits).await;

        let id = artifact.id().to_string();
        if let Err(e) = artifact.remove() {
            warn!("Failed to remove artifact {}: {}", id, e);
        }

        report
    }

    fn launch_spec(&self, artifact: &CodeArtifact, limits: &ResourceLimits) -> LaunchSpec {
        let runtime = &self.config.runtime;
        LaunchSpec {
            name: artifact.id().to_string(),
            image: runtime.image.clone(),
            command: runtime.command.clone(),
            mounts: vec![Mount::read_only(artifact.dir(), runtime.mount_point.clone())],
            working_dir: runtime.mount_point.clone(),
            env: vec![
                ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ],
            limits: limits.clone(),
        }
    }

    async fn run_in_sandbox(
        &self,
        artifact: &CodeArtifact,
        limits: &ResourceLimits,
    ) -> ExecutionReport {
        let spec = self.launch_spec(artifact, limits);

        if let Err(e) = self.provider.prepare(&spec).await {
            return ExecutionReport::infrastructure(e);
        }

        let handle = match self.provider.create(&spec).await {
            Ok(handle) => handle,
            Err(e) => return ExecutionReport::infrastructure(e),
        };
        debug!("Created {} sandbox {}", self.provider.name(), handle);

        let guard = HandleGuard::new(Arc::clone(&self.provider), handle);
        let report = self.await_outcome(&guard, limits).await;
        guard.release().await;

        report
    }

    async fn await_outcome(&self, guard: &HandleGuard, limits: &ResourceLimits) -> ExecutionReport {
        let handle = guard.handle();

        if let Err(e) = self.provider.start(handle).await {
            return ExecutionReport::infrastructure(e);
        }

        let deadline = limits.time_limit();
        let wait = self.provider.wait(handle, deadline);
        let status = match tokio::time::timeout(deadline + WAIT_GRACE, wait).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return ExecutionReport::infrastructure(e),
            Err(_) => WaitStatus::TimedOut,
        };

        if status == WaitStatus::TimedOut {
            return classify(status, &CapturedOutput::default(), limits);
        }

        match self.provider.capture_output(handle).await {
            Ok(output) => classify(status, &output, limits),
            Err(e) => ExecutionReport::infrastructure(e),
        }
    }
}

fn signal_name(sig: i32) -> String {
    match nix::sys::signal::Signal::try_from(sig) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("signal {}", sig),
    }
}

/// Map a finished (or timed-out) run to a verdict and caller-facing text
pub fn classify(
    status: WaitStatus,
    output: &CapturedOutput,
    limits: &ResourceLimits,
) -> ExecutionReport {
    let (verdict, output) = match status {
        WaitStatus::Exited(0) => (Verdict::Success, output.stdout.clone()),
        WaitStatus::Exited(code) => (
            Verdict::RuntimeError,
            format!("Execution failed (exit code: {})\n{}", code, output.combined()),
        ),
        WaitStatus::Signaled(sig) => (
            Verdict::RuntimeError,
            format!(
                "Execution failed (killed by {})\n{}",
                signal_name(sig),
                output.combined()
            ),
        ),
        WaitStatus::MemoryLimitExceeded => (
            Verdict::MemoryLimitExceeded,
            format!(
                "Execution exceeded the memory limit of {} MB\n{}",
                limits.memory_limit_mb,
                output.combined()
            ),
        ),
        WaitStatus::TimedOut => (
            Verdict::TimeLimitExceeded,
            format!(
                "Execution timed out (exceeded {} seconds)",
                limits.time_limit_seconds
            ),
        ),
    };

    ExecutionReport {
        verdict,
        output,
        elapsed_ms: 0,
    }
}
