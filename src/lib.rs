//! Sandbox broker for untrusted Python snippets
//!
//! `SandboxBroker::execute_untrusted` writes a snippet to a private temporary
//! artifact, runs it in a fresh sandbox instance from an injected
//! `EnvironmentProvider` (2 s, 128 MB, no network, read-only filesystem by
//! default), and always tears both down before returning.

pub mod artifact;
pub mod broker;
pub mod config;
pub mod core;
pub mod fallback;
pub mod sandbox;

pub use broker::{ExecutionReport, ExecutionResult, SandboxBroker};
pub use config::{Backend, BrokerConfig, ResourceLimits};
pub use core::Verdict;
pub use sandbox::{EnvironmentProvider, ProviderError};
