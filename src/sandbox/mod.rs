//! Sandbox module - Execution environment providers
//!
//! This module defines the interface the broker uses to obtain an isolated,
//! resource-capped process environment, and the backends implementing it:
//! - `DockerProvider`: one throwaway container per run
//! - `IsolateProvider`: one isolate box (cgroups + namespaces) per run
//!
//! The sandbox module does NOT:
//! - Classify outcomes into verdicts (that's the broker's job)
//! - Own the artifact on disk
//! - Retry anything

pub mod command;
pub mod docker;
pub mod isolate_box;
pub mod meta;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::ResourceLimits;

pub use docker::DockerProvider;
pub use isolate_box::IsolateProvider;

/// Errors raised by a provider; the broker reports all of them as
/// infrastructure failures
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backend binary could not be started at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An auxiliary backend command did not finish in time
    #[error("{action} timed out after {}s", .timeout.as_secs())]
    CommandTimeout { action: String, timeout: Duration },

    /// A backend command ran but reported failure
    #[error("{action} failed: {message}")]
    CommandFailed { action: String, message: String },

    /// The backend is installed but not usable (daemon down, no cgroups,
    /// missing image, ...)
    #[error("sandbox backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something we could not interpret
    #[error("unexpected response from {action}: {output:?}")]
    Protocol { action: String, output: String },

    #[error("unknown sandbox handle {0}")]
    UnknownHandle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A host directory exposed inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }
}

/// Everything a provider needs to create one sandbox instance
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Unique per invocation; providers derive instance names from it
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    pub working_dir: String,
    /// Extra environment (key, value)
    pub env: Vec<(String, String)>,
    pub limits: ResourceLimits,
}

/// Opaque reference to one created sandbox instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle {
    id: String,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// How a sandboxed process ended (raw, no verdict interpretation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Killed for exceeding the memory ceiling
    MemoryLimitExceeded,
    /// Still running at the deadline
    TimedOut,
}

/// Output streams collected from a finished instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Stdout followed by stderr, without doubling up empty streams
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut combined = self.stdout.clone();
                if !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(&self.stderr);
                combined
            }
        }
    }
}

/// An execution environment provider
///
/// Implementations enforce the limits in the `LaunchSpec` themselves; the
/// broker only adds its own deadline on top of `wait`.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Check the backend is reachable and ready for `spec`
    async fn prepare(&self, spec: &LaunchSpec) -> Result<(), ProviderError>;

    /// Create (but do not start) an instance
    async fn create(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ProviderError>;

    /// Start the program inside the instance
    async fn start(&self, handle: &SandboxHandle) -> Result<(), ProviderError>;

    /// Wait for the program to finish, at most `deadline`
    async fn wait(
        &self,
        handle: &SandboxHandle,
        deadline: Duration,
    ) -> Result<WaitStatus, ProviderError>;

    /// Collect stdout and stderr of a finished instance
    async fn capture_output(&self, handle: &SandboxHandle)
        -> Result<CapturedOutput, ProviderError>;

    /// Kill and delete the instance; must be safe to call on any state
    async fn force_remove(&self, handle: &SandboxHandle) -> Result<(), ProviderError>;
}
