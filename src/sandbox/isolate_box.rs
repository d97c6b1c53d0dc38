//! Isolate-backed execution environment
//!
//! Wraps the isolate sandbox (https://github.com/ioi/isolate): cgroup memory
//! limit, wall-clock limit, private network namespace, and the artifact
//! directory bound read-only.
//!
//! Box ids are claimed with an exclusive `flock` on `<lock_dir>/box-<id>.lock`
//! and held until the box is cleaned up, so brokers in different processes on
//! the same host never share a box. The lock dies with its process, so a
//! crashed broker never strands an id.
//!
//! Isolate always gives the program a private writable `/box`; it lives and
//! dies with the box and is wiped by `--cleanup`.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::command::run_command;
use super::meta::parse_meta;
use super::{
    CapturedOutput, EnvironmentProvider, LaunchSpec, ProviderError, SandboxHandle, WaitStatus,
};
use crate::config::IsolateConfig;

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
const LOCK_DIR_NAME: &str = "gomoku-sandbox-isolate-locks";

/// How long past the deadline a wedged keeper gets before it is killed;
/// isolate reports the timeout itself well within this
const KEEPER_GRACE: Duration = Duration::from_millis(250);

/// Exclusive hold on one box id, released on drop
struct BoxClaim {
    box_id: u32,
    _lock: Flock<File>,
}

impl std::fmt::Debug for BoxClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxClaim").field("box_id", &self.box_id).finish()
    }
}

/// Per-box bookkeeping between `create` and `force_remove`
#[derive(Debug)]
struct BoxState {
    claim: BoxClaim,
    box_path: String,
    meta_file: PathBuf,
    run_args: Vec<String>,
    child: Option<Child>,
}

impl BoxState {
    /// The box/box subdirectory (what the program sees as /box)
    fn work_dir(&self) -> String {
        format!("{}/box", self.box_path)
    }
}

/// Isolate box manager
#[derive(Debug)]
pub struct IsolateProvider {
    config: IsolateConfig,
    counter: AtomicU32,
    /// Set once a cgroup probe succeeded; failures are re-probed
    cgroups_ok: AtomicBool,
    boxes: Mutex<HashMap<String, BoxState>>,
}

impl IsolateProvider {
    pub fn new(config: IsolateConfig) -> Self {
        Self {
            config,
            counter: AtomicU32::new(0),
            cgroups_ok: AtomicBool::new(false),
            boxes: Mutex::new(HashMap::new()),
        }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_seconds)
    }

    fn lock_dir(&self) -> PathBuf {
        self.config
            .lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(LOCK_DIR_NAME))
    }

    /// Claim a free box id, starting from the next one in rotation. Ids held
    /// by any broker on this host are skipped.
    fn claim_box_id(&self) -> Result<BoxClaim, ProviderError> {
        let range = self.config.box_id_range;
        if range == 0 {
            return Err(ProviderError::Unavailable(
                "no isolate box ids configured".to_string(),
            ));
        }

        let dir = self.lock_dir();
        std::fs::create_dir_all(&dir)?;

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        for offset in 0..range {
            let Some(box_id) = self
                .config
                .box_id_base
                .checked_add(start.wrapping_add(offset) % range)
            else {
                continue;
            };

            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(dir.join(format!("box-{}.lock", box_id)))?;

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => return Ok(BoxClaim { box_id, _lock: lock }),
                Err((_, errno)) if errno == Errno::EWOULDBLOCK => continue,
                Err((_, errno)) => return Err(ProviderError::Io(errno.into())),
            }
        }

        Err(ProviderError::Unavailable(format!(
            "all {} isolate box ids are in use",
            range
        )))
    }

    async fn isolate(&self, args: Vec<String>, action: &str) -> Result<String, ProviderError> {
        let output = run_command(&self.config.binary, &args, self.command_timeout(), action)
            .await?
            .ensure_success(action)?;
        Ok(output.stdout)
    }

    async fn cleanup_box(&self, box_id: u32) -> Result<(), ProviderError> {
        self.isolate(
            vec![
                format!("--box-id={}", box_id),
                "--cg".to_string(),
                "--cleanup".to_string(),
            ],
            "isolate --cleanup",
        )
        .await?;
        Ok(())
    }

    /// Check if isolate cgroups are available
    async fn cgroups_available(&self) -> Result<bool, ProviderError> {
        if self.cgroups_ok.load(Ordering::Relaxed) {
            return Ok(true);
        }

        let claim = self.claim_box_id()?;
        let box_id = claim.box_id;
        let init = run_command(
            &self.config.binary,
            &[
                format!("--box-id={}", box_id),
                "--cg".to_string(),
                "--init".to_string(),
            ],
            self.command_timeout(),
            "isolate --init",
        )
        .await?;

        if let Err(e) = self.cleanup_box(box_id).await {
            warn!("Failed to clean up isolate probe box {}: {}", box_id, e);
        }

        drop(claim);

        let available = init.status.success();
        if available {
            self.cgroups_ok.store(true, Ordering::Relaxed);
        } else {
            warn!("Isolate cgroup probe failed: {}", init.stderr.trim());
        }
        Ok(available)
    }

    /// Arguments for `isolate --run` with every limit in `spec` applied
    pub fn run_args(&self, box_id: u32, meta_file: &str, spec: &LaunchSpec) -> Vec<String> {
        let limits = &spec.limits;
        let seconds = limits.time_limit_seconds;

        let mut args = vec![
            format!("--box-id={}", box_id),
            "--cg".to_string(),
            format!("--cg-mem={}", limits.memory_limit_kb()),
            format!("--time={}", seconds),
            // Isolate enforces the wall clock itself and reports TO
            format!("--wall-time={}", seconds),
            format!("--meta={}", meta_file),
            format!("--stdout=/box/{}", STDOUT_FILE),
            format!("--stderr=/box/{}", STDERR_FILE),
            format!("--processes={}", self.config.processes),
            format!("--open-files={}", self.config.open_files),
            format!("--fsize={}", self.config.fsize_kb),
            // Read-only runtime directories
            "--dir=/usr".to_string(),
            "--dir=/lib".to_string(),
            "--dir=/lib64:maybe".to_string(),
            "--dir=/etc:noexec".to_string(),
            "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
            "--env=HOME=/box".to_string(),
        ];

        if limits.filesystem_writable {
            args.push("--dir=/tmp:tmp".to_string());
        }
        if limits.network_enabled {
            args.push("--share-net".to_string());
        }

        for mount in &spec.mounts {
            let mut arg = format!("--dir={}={}", mount.target, mount.source.display());
            if !mount.read_only {
                arg.push_str(":rw");
            }
            args.push(arg);
        }

        args.push(format!("--chdir={}", spec.working_dir));
        for (key, value) in &spec.env {
            args.push(format!("--env={}={}", key, value));
        }

        args.push("--run".to_string());
        args.push("--".to_string());

        // Prepend /usr/bin/ to the command if it's not an absolute path
        let mut cmd_iter = spec.command.iter();
        if let Some(cmd) = cmd_iter.next() {
            if cmd.starts_with('/') || cmd.starts_with("./") {
                args.push(cmd.clone());
            } else {
                args.push(format!("/usr/bin/{}", cmd));
            }
            args.extend(cmd_iter.cloned());
        }

        args
    }
}

impl Default for IsolateProvider {
    fn default() -> Self {
        Self::new(IsolateConfig::default())
    }
}

#[async_trait]
impl EnvironmentProvider for IsolateProvider {
    fn name(&self) -> &'static str {
        "isolate"
    }

    async fn prepare(&self, _spec: &LaunchSpec) -> Result<(), ProviderError> {
        if self.cgroups_available().await? {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(
                "isolate cgroup support is required but not available".to_string(),
            ))
        }
    }

    async fn create(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ProviderError> {
        let claim = self.claim_box_id()?;
        let box_id = claim.box_id;

        // The id is exclusively ours now; a box still under it was left by a
        // broker that died mid-run
        if let Err(e) = self.cleanup_box(box_id).await {
            debug!("Pre-init cleanup of box {} failed: {}", box_id, e);
        }

        let stdout = self
            .isolate(
                vec![
                    format!("--box-id={}", box_id),
                    "--cg".to_string(),
                    "--init".to_string(),
                ],
                "isolate --init",
            )
            .await?;

        let box_path = stdout.trim().to_string();
        if box_path.is_empty() {
            return Err(ProviderError::Protocol {
                action: "isolate --init".to_string(),
                output: stdout,
            });
        }
        info!("Initialized isolate box {} at {}", box_id, box_path);

        let meta_file =
            std::env::temp_dir().join(format!("isolate_meta_{}_{}.txt", box_id, spec.name));
        if let Err(e) = fs::remove_file(&meta_file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove stale meta file {:?}: {}", meta_file, e);
            }
        }
        let run_args = self.run_args(box_id, &meta_file.to_string_lossy(), spec);

        let handle = SandboxHandle::new(box_id.to_string());
        self.boxes.lock().await.insert(
            handle.id().to_string(),
            BoxState {
                claim,
                box_path,
                meta_file,
                run_args,
                child: None,
            },
        );

        Ok(handle)
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        let mut boxes = self.boxes.lock().await;
        let state = boxes
            .get_mut(handle.id())
            .ok_or_else(|| ProviderError::UnknownHandle(handle.to_string()))?;

        debug!("Running isolate with args: {:?}", state.run_args);

        let child = Command::new(&self.config.binary)
            .args(&state.run_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProviderError::Spawn {
                program: self.config.binary.clone(),
                source,
            })?;

        state.child = Some(child);
        Ok(())
    }

    async fn wait(
        &self,
        handle: &SandboxHandle,
        deadline: Duration,
    ) -> Result<WaitStatus, ProviderError> {
        let (child, meta_file) = {
            let mut boxes = self.boxes.lock().await;
            let state = boxes
                .get_mut(handle.id())
                .ok_or_else(|| ProviderError::UnknownHandle(handle.to_string()))?;
            let child = state.child.take().ok_or_else(|| ProviderError::Protocol {
                action: "isolate wait".to_string(),
                output: format!("box {} was never started", state.claim.box_id),
            })?;
            (child, state.meta_file.clone())
        };

        // Dropping the child on timeout kills the keeper
        let bound = deadline + KEEPER_GRACE;
        let output = match tokio::time::timeout(bound, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Ok(WaitStatus::TimedOut),
        };

        let meta_content = fs::read_to_string(&meta_file).await.unwrap_or_default();
        if meta_content.is_empty() {
            return Err(ProviderError::CommandFailed {
                action: "isolate --run".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let meta = parse_meta(&meta_content);
        debug!(
            "Box {} finished: {:?} in {}ms, {}KB",
            handle, meta.status, meta.wall_time_ms, meta.memory_kb
        );

        meta.wait_status().ok_or_else(|| ProviderError::CommandFailed {
            action: "isolate --run".to_string(),
            message: meta.message.clone(),
        })
    }

    async fn capture_output(
        &self,
        handle: &SandboxHandle,
    ) -> Result<CapturedOutput, ProviderError> {
        let work_dir = {
            let boxes = self.boxes.lock().await;
            boxes
                .get(handle.id())
                .map(BoxState::work_dir)
                .ok_or_else(|| ProviderError::UnknownHandle(handle.to_string()))?
        };

        let stdout = fs::read_to_string(format!("{}/{}", work_dir, STDOUT_FILE))
            .await
            .unwrap_or_default();
        let stderr = fs::read_to_string(format!("{}/{}", work_dir, STDERR_FILE))
            .await
            .unwrap_or_default();

        Ok(CapturedOutput { stdout, stderr })
    }

    async fn force_remove(&self, handle: &SandboxHandle) -> Result<(), ProviderError> {
        let BoxState {
            claim,
            meta_file,
            child,
            ..
        } = self
            .boxes
            .lock()
            .await
            .remove(handle.id())
            .ok_or_else(|| ProviderError::UnknownHandle(handle.to_string()))?;

        // Kills a keeper that is still running
        drop(child);

        if let Err(e) = fs::remove_file(&meta_file).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                debug!("No meta file to remove for box {}", claim.box_id);
            } else {
                warn!("Failed to remove meta file {:?}: {}", meta_file, e);
            }
        }

        // The claim is released only after the box is gone
        let box_id = claim.box_id;
        let cleanup = self.cleanup_box(box_id).await;
        drop(claim);

        cleanup?;
        info!("Cleaned up isolate box {}", box_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::sandbox::Mount;

    fn spec(limits: ResourceLimits) -> LaunchSpec {
        LaunchSpec {
            name: "gomoku-sandbox-abc123".to_string(),
            image: "python:3.9-slim".to_string(),
            command: vec!["python3".to_string(), "user_code.py".to_string()],
            mounts: vec![Mount::read_only("/tmp/gomoku-sandbox-abc123", "/code")],
            working_dir: "/code".to_string(),
            env: vec![],
            limits,
        }
    }

    #[test]
    fn test_run_args_locked_down() {
        let provider = IsolateProvider::default();
        let args = provider.run_args(7, "/tmp/meta.txt", &spec(ResourceLimits::default()));

        assert!(args.contains(&"--box-id=7".to_string()));
        assert!(args.contains(&"--cg-mem=131072".to_string()));
        assert!(args.contains(&"--time=2".to_string()));
        assert!(args.contains(&"--wall-time=2".to_string()));
        assert!(args.contains(&"--dir=/code=/tmp/gomoku-sandbox-abc123".to_string()));
        assert!(args.contains(&"--chdir=/code".to_string()));
        assert!(!args.contains(&"--share-net".to_string()));
        assert!(!args.contains(&"--dir=/tmp:tmp".to_string()));

        let tail = &args[args.len() - 3..];
        assert_eq!(tail, ["--", "/usr/bin/python3", "user_code.py"]);
    }

    #[test]
    fn test_run_args_relaxed() {
        let provider = IsolateProvider::default();
        let limits = ResourceLimits {
            network_enabled: true,
            filesystem_writable: true,
            ..ResourceLimits::default()
        };
        let args = provider.run_args(7, "/tmp/meta.txt", &spec(limits));

        assert!(args.contains(&"--share-net".to_string()));
        assert!(args.contains(&"--dir=/tmp:tmp".to_string()));
    }

    #[test]
    fn test_box_ids_are_claimed_exclusively() {
        let locks = tempfile::tempdir().unwrap();
        let config = IsolateConfig {
            box_id_base: 100,
            box_id_range: 3,
            lock_dir: Some(locks.path().to_path_buf()),
            ..IsolateConfig::default()
        };
        let first = IsolateProvider::new(config.clone());
        let second = IsolateProvider::new(config);

        // Both start their rotation at 100; held ids are skipped
        let a = first.claim_box_id().unwrap();
        let b = second.claim_box_id().unwrap();
        let c = first.claim_box_id().unwrap();
        let mut ids = vec![a.box_id, b.box_id, c.box_id];
        ids.sort();
        assert_eq!(ids, vec![100, 101, 102]);

        assert!(matches!(
            second.claim_box_id(),
            Err(ProviderError::Unavailable(_))
        ));

        let freed = b.box_id;
        drop(b);
        assert_eq!(second.claim_box_id().unwrap().box_id, freed);
    }

    #[test]
    fn test_empty_box_range_is_unavailable() {
        let provider = IsolateProvider::new(IsolateConfig {
            box_id_range: 0,
            ..IsolateConfig::default()
        });
        assert!(matches!(
            provider.claim_box_id(),
            Err(ProviderError::Unavailable(_))
        ));
    }

    const RUN_OK: &str = r#"
    printf 'hello\n' > "$root/box-$box/box/stdout.txt"
    printf 'time-wall:0.010\ncg-mem:2048\nexitcode:0\n' > "$meta"
"#;

    const RUN_ZERO_DIVISION: &str = r#"
    printf 'Traceback\nZeroDivisionError\n' > "$root/box-$box/box/stderr.txt"
    printf 'status:RE\nexitcode:1\nmessage:Exited with error status 1\n' > "$meta"
    exit 1
"#;

    const RUN_NO_META: &str = r#"
    echo "Cannot run proxy" >&2
    exit 2
"#;

    const RUN_HANG: &str = r#"
    exec sleep 30
"#;

    /// Stand-in isolate binary that keeps boxes as directories under `root`
    /// and logs every invocation to `root/calls.log`
    fn fake_isolate(root: &std::path::Path, init_ok: bool, run_body: &str) -> IsolateProvider {
        let init_body = if init_ok {
            r#"mkdir -p "$root/box-$box/box"; echo "$root/box-$box""#
        } else {
            r#"echo "cgroup controller not available" >&2; exit 1"#
        };
        let script = format!(
            r#"#!/bin/sh
root="{root}"
echo "$*" >> "$root/calls.log"
box=""
meta=""
action=""
for arg in "$@"; do
  case "$arg" in
    --box-id=*) box="${{arg#--box-id=}}" ;;
    --meta=*) meta="${{arg#--meta=}}" ;;
    --init|--cleanup|--run) [ -z "$action" ] && action="$arg" ;;
  esac
done
case "$action" in
  --init) {init_body} ;;
  --cleanup) rm -rf "$root/box-$box" ;;
  --run)
{run_body}
    ;;
esac
"#,
            root = root.display(),
            init_body = init_body,
            run_body = run_body,
        );

        let binary = root.join("isolate");
        std::fs::write(&binary, script).unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        IsolateProvider::new(IsolateConfig {
            binary: binary.to_string_lossy().into_owned(),
            box_id_range: 4,
            lock_dir: Some(root.join("locks")),
            ..IsolateConfig::default()
        })
    }

    fn named_spec(name: &str) -> LaunchSpec {
        LaunchSpec {
            name: name.to_string(),
            ..spec(ResourceLimits::default())
        }
    }

    fn calls(root: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(root.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lifecycle_success() {
        let root = tempfile::tempdir().unwrap();
        let provider = fake_isolate(root.path(), true, RUN_OK);
        let spec = named_spec("gomoku-sandbox-lifecycle-ok");

        provider.prepare(&spec).await.unwrap();
        let handle = provider.create(&spec).await.unwrap();
        let box_dir = root.path().join(format!("box-{}", handle));
        assert!(box_dir.exists());

        provider.start(&handle).await.unwrap();
        let status = provider.wait(&handle, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status, WaitStatus::Exited(0));

        let output = provider.capture_output(&handle).await.unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "");

        provider.force_remove(&handle).await.unwrap();
        assert!(!box_dir.exists());
        assert!(matches!(
            provider.capture_output(&handle).await,
            Err(ProviderError::UnknownHandle(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lifecycle_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let provider = fake_isolate(root.path(), true, RUN_ZERO_DIVISION);
        let spec = named_spec("gomoku-sandbox-lifecycle-re");

        let handle = provider.create(&spec).await.unwrap();
        provider.start(&handle).await.unwrap();
        let status = provider.wait(&handle, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status, WaitStatus::Exited(1));

        let output = provider.capture_output(&handle).await.unwrap();
        assert!(output.stderr.contains("ZeroDivisionError"));
        provider.force_remove(&handle).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_meta_is_error() {
        let root = tempfile::tempdir().unwrap();
        let provider = fake_isolate(root.path(), true, RUN_NO_META);
        let spec = named_spec("gomoku-sandbox-lifecycle-nometa");

        let handle = provider.create(&spec).await.unwrap();
        provider.start(&handle).await.unwrap();
        let err = provider
            .wait(&handle, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::CommandFailed { .. }));
        assert!(err.to_string().contains("Cannot run proxy"));
        provider.force_remove(&handle).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wedged_keeper_is_killed_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let provider = fake_isolate(root.path(), true, RUN_HANG);
        let spec = named_spec("gomoku-sandbox-lifecycle-hang");

        let handle = provider.create(&spec).await.unwrap();
        let box_dir = root.path().join(format!("box-{}", handle));
        provider.start(&handle).await.unwrap();

        let started = std::time::Instant::now();
        let status = provider
            .wait(&handle, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));

        provider.force_remove(&handle).await.unwrap();
        assert!(!box_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_providers_never_share_a_box() {
        let root = tempfile::tempdir().unwrap();
        let first = fake_isolate(root.path(), true, RUN_OK);
        let second = IsolateProvider::new(first.config.clone());

        let a = first.create(&named_spec("gomoku-sandbox-claim-a")).await.unwrap();
        let b = second.create(&named_spec("gomoku-sandbox-claim-b")).await.unwrap();
        assert_ne!(a, b);

        // The second create must not have touched the first box
        assert!(root.path().join(format!("box-{}", a)).exists());
        let cleanup_of_a = format!("--box-id={} --cg --cleanup", a);
        let init_of_a = format!("--box-id={} --cg --init", a);
        let log = calls(root.path());
        let init_at = log.iter().position(|line| *line == init_of_a).unwrap();
        assert!(!log[init_at..].contains(&cleanup_of_a));

        first.force_remove(&a).await.unwrap();
        second.force_remove(&b).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_cgroup_probe_is_retried() {
        let root = tempfile::tempdir().unwrap();
        let provider = fake_isolate(root.path(), false, RUN_OK);
        let spec = named_spec("gomoku-sandbox-probe");

        for _ in 0..2 {
            assert!(matches!(
                provider.prepare(&spec).await,
                Err(ProviderError::Unavailable(_))
            ));
        }

        let inits = calls(root.path())
            .iter()
            .filter(|line| line.ends_with("--init"))
            .count();
        assert_eq!(inits, 2);
    }

    #[tokio::test]
    async fn test_unknown_handle_is_rejected() {
        let provider = IsolateProvider::default();
        let handle = SandboxHandle::new("42");

        assert!(matches!(
            provider.start(&handle).await,
            Err(ProviderError::UnknownHandle(_))
        ));
        assert!(matches!(
            provider.force_remove(&handle).await,
            Err(ProviderError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_prepare_without_isolate_binary_is_error() {
        let provider = IsolateProvider::new(IsolateConfig {
            binary: "/nonexistent/isolate".to_string(),
            ..IsolateConfig::default()
        });

        let result = provider.prepare(&spec(ResourceLimits::default())).await;
        assert!(matches!(result, Err(ProviderError::Spawn { .. })));
    }
}
