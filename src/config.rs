//! Broker configuration
//!
//! Defaults are embedded from `files/sandbox.toml`. A different file can be
//! named through `SANDBOX_CONFIG`, and a handful of environment variables
//! override single values on top of whichever file was loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/sandbox.toml"));

/// Which execution environment provider backs the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Docker,
    Isolate,
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Backend::Docker),
            "isolate" => Ok(Backend::Isolate),
            other => anyhow::bail!("Unknown sandbox backend: {}", other),
        }
    }
}

/// Resource limits applied to every sandboxed run
///
/// The default is the locked-down profile: 2 seconds, 128 MB, no network,
/// read-only filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock limit measured from process start
    pub time_limit_seconds: u32,
    /// Memory ceiling enforced by the provider (swap included)
    pub memory_limit_mb: u32,
    pub network_enabled: bool,
    /// Whether anything besides the artifact mount may be written
    pub filesystem_writable: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit_seconds: 2,
            memory_limit_mb: 128,
            network_enabled: false,
            filesystem_writable: false,
        }
    }
}

impl ResourceLimits {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_limit_seconds))
    }

    pub fn memory_limit_kb(&self) -> u64 {
        u64::from(self.memory_limit_mb) * 1024
    }

    /// True when any limit is looser than the locked-down default
    pub fn is_relaxed(&self) -> bool {
        let locked = Self::default();
        self.network_enabled
            || self.filesystem_writable
            || self.time_limit_seconds > locked.time_limit_seconds
            || self.memory_limit_mb > locked.memory_limit_mb
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.time_limit_seconds == 0 {
            anyhow::bail!("time_limit_seconds must be greater than zero");
        }
        // Docker refuses memory limits below 6 MB
        if self.memory_limit_mb < 6 {
            anyhow::bail!(
                "memory_limit_mb must be at least 6 (got {})",
                self.memory_limit_mb
            );
        }
        Ok(())
    }
}

/// How the snippet is laid out and invoked inside the sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container image (ignored by the isolate backend)
    pub image: String,
    /// Runtime command, run with the mount point as working directory
    pub command: Vec<String>,
    /// File name the snippet is written to
    pub artifact_name: String,
    /// Where the artifact directory appears inside the sandbox
    pub mount_point: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: "python:3.9-slim".to_string(),
            command: vec!["python".to_string(), "user_code.py".to_string()],
            artifact_name: "user_code.py".to_string(),
            mount_point: "/code".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub binary: String,
    /// Pull the runtime image when it is not present locally
    pub pull_missing_image: bool,
    pub pids_limit: u32,
    /// CPU quota as a percentage of one core
    pub cpu_percent: u32,
    /// `uid:gid` the snippet runs as; empty keeps the image default
    pub user: String,
    /// Upper bound for every auxiliary docker command
    pub command_timeout_seconds: u64,
    pub pull_timeout_seconds: u64,
    /// `max-size` log option for the container; empty leaves the daemon default
    pub log_max_size: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            pull_missing_image: true,
            pids_limit: 10,
            cpu_percent: 50,
            user: "65534:65534".to_string(),
            command_timeout_seconds: 10,
            pull_timeout_seconds: 300,
            log_max_size: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolateConfig {
    pub binary: String,
    /// First box id this broker may use
    pub box_id_base: u32,
    /// Number of box ids available (isolate supports 0-9999)
    pub box_id_range: u32,
    /// Directory of per-box lock files shared by every broker on the host
    pub lock_dir: Option<PathBuf>,
    pub processes: u32,
    pub open_files: u32,
    /// Maximum size of any file the program writes, in KB
    pub fsize_kb: u32,
    pub command_timeout_seconds: u64,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            binary: "isolate".to_string(),
            box_id_base: 0,
            box_id_range: 1000,
            lock_dir: None,
            processes: 10,
            open_files: 64,
            fsize_kb: 1024,
            command_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Captured output beyond this many bytes is truncated
    pub max_bytes: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { max_bytes: 64 * 1024 }
    }
}

/// Complete broker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: Backend,
    pub limits: ResourceLimits,
    pub runtime: RuntimeConfig,
    pub docker: DockerConfig,
    pub isolate: IsolateConfig,
    pub output: OutputConfig,
}

impl BrokerConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: BrokerConfig =
            toml::from_str(content).context("Failed to parse sandbox configuration")?;
        Ok(config)
    }

    /// Load from `path`, or from `SANDBOX_CONFIG`, or from the embedded
    /// defaults, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("SANDBOX_CONFIG").ok().map(PathBuf::from));

        let mut config = match &path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read sandbox config {:?}", path))?;
                info!("Loaded sandbox configuration from {:?}", path);
                Self::from_toml(&content)?
            }
            None => Self::from_toml(DEFAULT_CONFIG)?,
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        if config.limits.is_relaxed() {
            warn!(
                "Sandbox limits relaxed by configuration: {:?}",
                config.limits
            );
        }

        Ok(config)
    }

    /// Apply `SANDBOX_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("SANDBOX_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(image) = lookup("SANDBOX_IMAGE") {
            self.runtime.image = image;
        }
        if let Some(value) = lookup("SANDBOX_TIME_LIMIT_SECONDS") {
            self.limits.time_limit_seconds = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid SANDBOX_TIME_LIMIT_SECONDS: {}", value))?;
        }
        if let Some(value) = lookup("SANDBOX_MEMORY_LIMIT_MB") {
            self.limits.memory_limit_mb = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid SANDBOX_MEMORY_LIMIT_MB: {}", value))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.limits.validate()?;

        if self.runtime.command.is_empty() {
            anyhow::bail!("runtime.command must not be empty");
        }
        if self.runtime.artifact_name.is_empty()
            || self.runtime.artifact_name.contains('/')
            || self.runtime.artifact_name.contains("..")
        {
            anyhow::bail!(
                "runtime.artifact_name must be a plain file name (got {:?})",
                self.runtime.artifact_name
            );
        }
        if !self.runtime.mount_point.starts_with('/') || self.runtime.mount_point == "/" {
            anyhow::bail!(
                "runtime.mount_point must be an absolute path below / (got {:?})",
                self.runtime.mount_point
            );
        }
        let box_id_end = self
            .isolate
            .box_id_base
            .checked_add(self.isolate.box_id_range);
        if self.isolate.box_id_range == 0 || !box_id_end.is_some_and(|end| end <= 10_000) {
            anyhow::bail!(
                "isolate box ids must be a non-empty range within 0-9999 (base {}, range {})",
                self.isolate.box_id_base,
                self.isolate.box_id_range
            );
        }
        Ok(())
    }
}
