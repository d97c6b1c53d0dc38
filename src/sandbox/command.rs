//! Bounded execution of backend CLI commands (docker, isolate)

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::ProviderError;

/// Output of one backend command
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// A stream hit its cap and the command was killed early
    pub truncated: bool,
}

impl CommandOutput {
    /// Turn a non-zero exit into `ProviderError::CommandFailed`. A command
    /// killed for exceeding its output cap counts as successful.
    pub fn ensure_success(self, action: &str) -> Result<Self, ProviderError> {
        if self.status.success() || self.truncated {
            Ok(self)
        } else {
            let message = if self.stderr.trim().is_empty() {
                format!("exit status {}", self.status)
            } else {
                self.stderr.trim().to_string()
            };
            Err(ProviderError::CommandFailed {
                action: action.to_string(),
                message,
            })
        }
    }
}

fn spawn(program: &str, args: &[String]) -> Result<Child, ProviderError> {
    debug!("Running {} with args: {:?}", program, args);

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProviderError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Run `program args...` to completion, killing it after `timeout`
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
    action: &str,
) -> Result<CommandOutput, ProviderError> {
    let child = spawn(program, args)?;

    // Dropping the future on timeout drops the child, which kills it
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProviderError::CommandTimeout {
            action: action.to_string(),
            timeout,
        })??;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        truncated: false,
    })
}

/// Read at most `max_bytes` from `reader`; the flag reports whether more
/// was available
async fn read_capped<R>(reader: Option<R>, max_bytes: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut buf = Vec::new();
    reader
        .take((max_bytes as u64).saturating_add(1))
        .read_to_end(&mut buf)
        .await?;

    let truncated = buf.len() > max_bytes;
    buf.truncate(max_bytes);
    Ok((buf, truncated))
}

/// Like `run_command`, but keeps at most `max_bytes` of each stream. A
/// command that produces more is killed once the cap is reached.
pub async fn run_command_capped(
    program: &str,
    args: &[String],
    timeout: Duration,
    action: &str,
    max_bytes: usize,
) -> Result<CommandOutput, ProviderError> {
    let mut child = spawn(program, args)?;
    let pid = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // The child is not reaped until `wait` below, so the pid stays ours
    let stop = || {
        if let Some(pid) = pid {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                warn!("Failed to stop {} after output cap: {}", program, e);
            }
        }
    };

    let collect = async {
        let (out, err) = tokio::try_join!(
            async {
                let read = read_capped(stdout, max_bytes).await?;
                if read.1 {
                    stop();
                }
                Ok::<_, std::io::Error>(read)
            },
            async {
                let read = read_capped(stderr, max_bytes).await?;
                if read.1 {
                    stop();
                }
                Ok::<_, std::io::Error>(read)
            },
        )?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out, err))
    };

    let (status, (stdout, out_truncated), (stderr, err_truncated)) =
        tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| ProviderError::CommandTimeout {
                action: action.to_string(),
                timeout,
            })??;

    if out_truncated || err_truncated {
        debug!("{} output capped at {} bytes per stream", action, max_bytes);
    }

    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        truncated: out_truncated || err_truncated,
    })
}
