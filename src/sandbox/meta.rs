//! Isolate meta file parser
//!
//! Parses the meta file isolate writes after `--run` into a `WaitStatus`.

use super::WaitStatus;

/// Raw execution status from isolate
#[derive(Debug, Clone, PartialEq)]
pub enum IsolateStatus {
    /// Program exited normally
    Ok,
    /// Time or wall-time limit exceeded
    TimeOut,
    /// Killed by signal
    Signal(i32),
    /// Runtime error (non-zero exit)
    RuntimeError,
    /// Internal error in isolate
    InternalError,
}

/// Parsed isolate meta file contents
#[derive(Debug, Clone)]
pub struct IsolateMeta {
    /// Wall clock time in milliseconds
    pub wall_time_ms: u32,
    /// Memory used in KB (from cg-mem or max-rss)
    pub memory_kb: u64,
    pub exit_code: i32,
    pub status: IsolateStatus,
    /// Set when the cgroup OOM killer fired
    pub oom_killed: bool,
    /// Isolate's human-readable explanation, if any
    pub message: String,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            wall_time_ms: 0,
            memory_kb: 0,
            exit_code: 0,
            status: IsolateStatus::Ok,
            oom_killed: false,
            message: String::new(),
        }
    }
}

impl IsolateMeta {
    /// Map to a wait status; `None` means isolate itself failed
    pub fn wait_status(&self) -> Option<WaitStatus> {
        if self.oom_killed {
            return Some(WaitStatus::MemoryLimitExceeded);
        }
        match self.status {
            IsolateStatus::Ok => Some(WaitStatus::Exited(0)),
            IsolateStatus::RuntimeError => Some(WaitStatus::Exited(self.exit_code)),
            IsolateStatus::TimeOut => Some(WaitStatus::TimedOut),
            IsolateStatus::Signal(sig) => Some(WaitStatus::Signaled(sig)),
            IsolateStatus::InternalError => None,
        }
    }
}

/// Parse isolate meta file content
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut meta = IsolateMeta::default();
    let mut status_str = String::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "time-wall" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.wall_time_ms = (t * 1000.0) as u32;
                }
            }
            "cg-mem" | "max-rss" => {
                if let Ok(m) = value.parse::<u64>() {
                    meta.memory_kb = meta.memory_kb.max(m);
                }
            }
            "cg-oom-killed" => {
                meta.oom_killed = value == "1";
            }
            "status" => {
                status_str = value.to_string();
            }
            "exitcode" => {
                meta.exit_code = value.parse().unwrap_or(0);
            }
            "exitsig" => {
                if let Ok(sig) = value.parse::<i32>() {
                    meta.status = IsolateStatus::Signal(sig);
                }
            }
            "message" => {
                meta.message = value.to_string();
            }
            _ => {}
        }
    }

    // Determine status from status string if not already set by signal
    if meta.status == IsolateStatus::Ok {
        meta.status = match status_str.as_str() {
            "TO" => IsolateStatus::TimeOut,
            "SG" => IsolateStatus::Signal(0),
            "RE" => IsolateStatus::RuntimeError,
            "XX" => IsolateStatus::InternalError,
            "" if meta.exit_code == 0 => IsolateStatus::Ok,
            _ => IsolateStatus::RuntimeError,
        };
    }

    meta
}
