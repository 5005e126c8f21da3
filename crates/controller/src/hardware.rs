//! The controller's view of the hardware: provisioning gate, fail-open
//! helpers and the one fire-and-track call.

use std::sync::Arc;
use std::time::Duration;

use rvm_core::error::HardwareError;
use rvm_core::{HardwareCommand, HardwareGateway, ModuleId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A hardware call that runs alongside the cycle and is collected later.
struct Tracked {
    action: &'static str,
    handle: JoinHandle<Result<(), HardwareError>>,
}

pub struct HardwareBus {
    gateway: Arc<dyn HardwareGateway>,
    module: Option<ModuleId>,
    tracked: Option<Tracked>,
}

impl HardwareBus {
    pub fn new(gateway: Arc<dyn HardwareGateway>) -> Self {
        Self {
            gateway,
            module: None,
            tracked: None,
        }
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub fn module(&self) -> Option<&ModuleId> {
        self.module.as_ref()
    }

    pub fn set_module(&mut self, module: ModuleId) {
        self.module = Some(module);
    }

    pub fn is_provisioned(&self) -> bool {
        self.module.is_some()
    }

    /// Issue a command and wait for the acknowledgement.
    pub async fn send(&self, command: &HardwareCommand) -> Result<(), HardwareError> {
        let module = self.module.as_ref().ok_or(HardwareError::NotProvisioned)?;
        debug!(action = command.action(), "Hardware command");
        self.gateway.send(module, command).await
    }

    /// Issue a command; a failure is logged and the step counts as done.
    pub async fn best_effort(&self, command: &HardwareCommand) -> bool {
        match self.send(command).await {
            Ok(()) => true,
            Err(e) => {
                warn!(action = command.action(), error = %e, "Hardware step failed, continuing");
                false
            }
        }
    }

    /// The identity request is the one call allowed before provisioning.
    pub async fn request_module_id(&self) -> Result<(), HardwareError> {
        self.gateway.request_module_id().await
    }

    pub async fn health_check(&self) -> bool {
        self.gateway.health_check().await.unwrap_or(false)
    }

    /// Start `command` without waiting for it. Only one tracked call is in
    /// flight at a time; collect it with [`HardwareBus::settle_tracked`].
    pub fn spawn_tracked(&mut self, command: HardwareCommand) -> Result<(), HardwareError> {
        let module = self.module.clone().ok_or(HardwareError::NotProvisioned)?;
        let gateway = Arc::clone(&self.gateway);
        let action = command.action();
        let handle = tokio::spawn(async move { gateway.send(&module, &command).await });
        if let Some(previous) = self.tracked.replace(Tracked { action, handle }) {
            // Never expected: callers settle before spawning again.
            warn!(action = previous.action, "Replacing unsettled tracked call");
        }
        Ok(())
    }

    pub fn has_tracked(&self) -> bool {
        self.tracked.is_some()
    }

    /// Wait up to `limit` for the tracked call. Returns the failure, if any,
    /// so the caller can surface it.
    pub async fn settle_tracked(&mut self, limit: Duration) -> Option<(&'static str, HardwareError)> {
        let Tracked { action, handle } = self.tracked.take()?;
        let abort = handle.abort_handle();
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some((action, e)),
            Ok(Err(join)) => Some((action, HardwareError::Transport(join.to_string()))),
            Err(_) => {
                abort.abort();
                Some((
                    action,
                    HardwareError::Timeout {
                        action: action.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    },
                ))
            }
        }
    }
}
