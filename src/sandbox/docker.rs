//! Docker-backed execution environment
//!
//! Each run gets its own container created from the runtime image with the
//! network disabled, a read-only root filesystem, the artifact directory bound
//! read-only, and memory/CPU/pid limits enforced by the daemon. The container
//! is never started with `--rm`; the broker removes it explicitly so that a
//! timed-out container is killed and deleted in one `docker rm -f`.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::command::{run_command, run_command_capped};
use super::{
    CapturedOutput, EnvironmentProvider, LaunchSpec, ProviderError, SandboxHandle, WaitStatus,
};
use crate::config::{DockerConfig, OutputConfig};

/// Provider that shells out to the docker CLI
#[derive(Debug, Clone)]
pub struct DockerProvider {
    config: DockerConfig,
    /// Bytes kept per stream when reading container logs
    output_limit: usize,
}

impl DockerProvider {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            output_limit: OutputConfig::default().max_bytes,
        }
    }

    pub fn with_output_limit(mut self, output_limit: usize) -> Self {
        self.output_limit = output_limit;
        self
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_seconds)
    }

    async fn docker(&self, args: Vec<String>, action: &str) -> Result<String, ProviderError> {
        let output = run_command(&self.config.binary, &args, self.command_timeout(), action)
            .await?
            .ensure_success(action)?;
        Ok(output.stdout)
    }

    /// Arguments for `docker create` with every limit in `spec` applied
    pub fn create_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let limits = &spec.limits;
        let mut args = vec![
            "create".to_string(),
            format!("--name={}", spec.name),
            format!("--memory={}m", limits.memory_limit_mb),
            // Equal to --memory: no swap on top of the ceiling
            format!("--memory-swap={}m", limits.memory_limit_mb),
            format!("--pids-limit={}", self.config.pids_limit),
            "--cpu-period=100000".to_string(),
            format!(
                "--cpu-quota={}",
                u64::from(self.config.cpu_percent.clamp(1, 100)) * 1000
            ),
            "--security-opt=no-new-privileges".to_string(),
            "--cap-drop=ALL".to_string(),
            format!("--workdir={}", spec.working_dir),
        ];

        if !self.config.log_max_size.is_empty() {
            args.push(format!("--log-opt=max-size={}", self.config.log_max_size));
        }

        if !limits.network_enabled {
            args.push("--network=none".to_string());
        }
        if !limits.filesystem_writable {
            args.push("--read-only".to_string());
        }
        if !self.config.user.is_empty() {
            args.push(format!("--user={}", self.config.user));
        }

        for mount in &spec.mounts {
            let mut arg = format!(
                "--mount=type=bind,source={},target={}",
                mount.source.display(),
                mount.target
            );
            if mount.read_only {
                arg.push_str(",readonly");
            }
            args.push(arg);
        }

        for (key, value) in &spec.env {
            args.push(format!("--env={}={}", key, value));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    async fn pull_image(&self, image: &str) -> Result<(), ProviderError> {
        info!("Pulling docker image {}", image);
        let timeout = Duration::from_secs(self.config.pull_timeout_seconds);
        run_command(
            &self.config.binary,
            &["pull".to_string(), image.to_string()],
            timeout,
            "docker pull",
        )
        .await?
        .ensure_success("docker pull")?;
        info!("Pulled docker image {}", image);
        Ok(())
    }
}

impl Default for DockerProvider {
    fn default() -> Self {
        Self::new(DockerConfig::default())
    }
}

/// Parse `docker inspect --format '{{.State.OOMKilled}} {{.State.ExitCode}}'`
pub fn parse_container_state(output: &str) -> Option<(bool, i32)> {
    let mut parts = output.split_whitespace();
    let oom_killed = parts.next()?.parse::<bool>().ok()?;
    let exit_code = parts.next()?.parse::<i32>().ok()?;
    Some((oom_killed, exit_code))
}

/// Map container state to a wait status. Exit codes above 128 are the shell
/// convention for death by signal `code - 128`.
pub fn status_from_state(oom_killed: bool, exit_code: i32) -> WaitStatus {
    if oom_killed {
        WaitStatus::MemoryLimitExceeded
    } else if exit_code > 128 && exit_code < 128 + 65 {
        WaitStatus::Signaled(exit_code - 128)
    } else {
        WaitStatus::Exited(exit_code)
    }
}

#[async_trait]
impl EnvironmentProvider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn prepare(&self, spec: &LaunchSpec) -> Result<(), ProviderError> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format={{.Id}}".to_string(),
            spec.image.clone(),
        ];
        let output = run_command(
            &self.config.binary,
            &args,
            self.command_timeout(),
            "docker image inspect",
        )
        .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = output.stderr.trim();
        if !stderr.contains("No such image") {
            // Daemon unreachable, permission denied, ...
            return Err(ProviderError::Unavailable(stderr.to_string()));
        }

        if !self.config.pull_missing_image {
            return Err(ProviderError::Unavailable(format!(
                "image {} is not present and pulling is disabled",
                spec.image
            )));
        }

        self.pull_image(&spec.image).await
    }

    async fn create(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ProviderError> {
        let stdout = self.docker(self.create_args(spec), "docker create").await?;

        let id = stdout.trim();
        if id.is_empty() {
            return Err(ProviderError::Protocol {
                action: "docker create".to_string(),
                output: stdout,
            });
        }

        debug!("Created container {} ({})", spec.name, id);
        Ok(SandboxHandle::new(id))
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        self.docker(
            vec!["start".to_string(), handle.id().to_string()],
            "docker start",
        )
        .await?;
        Ok(())
    }

    async fn wait(
        &self,
        handle: &SandboxHandle,
        deadline: Duration,
    ) -> Result<WaitStatus, ProviderError> {
        let args = vec!["wait".to_string(), handle.id().to_string()];
        match run_command(&self.config.binary, &args, deadline, "docker wait").await {
            Ok(output) => {
                output.ensure_success("docker wait")?;
            }
            Err(ProviderError::CommandTimeout { .. }) => return Ok(WaitStatus::TimedOut),
            Err(e) => return Err(e),
        }

        let args = vec![
            "inspect".to_string(),
            "--format={{.State.OOMKilled}} {{.State.ExitCode}}".to_string(),
            handle.id().to_string(),
        ];
        let state = self.docker(args, "docker inspect").await?;
        let (oom_killed, exit_code) =
            parse_container_state(&state).ok_or_else(|| ProviderError::Protocol {
                action: "docker inspect".to_string(),
                output: state.clone(),
            })?;

        Ok(status_from_state(oom_killed, exit_code))
    }

    async fn capture_output(
        &self,
        handle: &SandboxHandle,
    ) -> Result<CapturedOutput, ProviderError> {
        // Without a TTY, docker logs keeps the container's streams apart
        let output = run_command_capped(
            &self.config.binary,
            &["logs".to_string(), handle.id().to_string()],
            self.command_timeout(),
            "docker logs",
            self.output_limit,
        )
        .await?
        .ensure_success("docker logs")?;

        Ok(CapturedOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn force_remove(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        let args = vec![
            "rm".to_string(),
            "--force".to_string(),
            "--volumes".to_string(),
            handle.id().to_string(),
        ];
        match self.docker(args, "docker rm").await {
            Ok(_) => {
                debug!("Removed container {}", handle);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", handle, e);
                Err(e)
            }
        }
    }
}
