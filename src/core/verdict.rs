use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of one sandboxed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Exited zero within the time limit
    Success,
    /// Exited non-zero or was killed by a signal
    RuntimeError,
    MemoryLimitExceeded,
    TimeLimitExceeded,
    /// The sandbox itself could not be prepared, launched or read
    SystemError,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }

    /// True when the failure says nothing about the user's code
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Verdict::SystemError)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Success => "success",
            Verdict::RuntimeError => "runtime_error",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::SystemError => "system_error",
        };
        write!(f, "{}", s)
    }
}
