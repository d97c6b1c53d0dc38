//! Scoped ownership of a sandbox instance

use std::sync::Arc;
use tracing::{debug, warn};

use crate::sandbox::{EnvironmentProvider, SandboxHandle};

/// Owns one sandbox instance until it is released
///
/// `release` removes the instance and waits for it. If the guard is dropped
/// unreleased (the invocation future was cancelled), removal is spawned onto
/// the current runtime instead.
pub struct HandleGuard {
    provider: Arc<dyn EnvironmentProvider>,
    handle: SandboxHandle,
    released: bool,
}

impl HandleGuard {
    pub fn new(provider: Arc<dyn EnvironmentProvider>, handle: SandboxHandle) -> Self {
        Self {
            provider,
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    /// Force-remove the instance. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match self.provider.force_remove(&self.handle).await {
            Ok(()) => debug!("Released {} sandbox {}", self.provider.name(), self.handle),
            Err(e) => warn!(
                "Teardown of {} sandbox {} failed: {}",
                self.provider.name(),
                self.handle,
                e
            ),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Sandbox {} abandoned mid-run; removing in background", handle);
                runtime.spawn(async move {
                    if let Err(e) = provider.force_remove(&handle).await {
                        warn!("Background teardown of sandbox {} failed: {}", handle, e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "Sandbox {} abandoned outside a runtime and could not be removed",
                    handle
                );
            }
        }
    }
}
