//! Compactor run policy.
//!
//! The compactor starts on the first accepted item of a session, keeps
//! running while items keep coming, and stops after an idle interval or on
//! teardown. It is never started unless session cycling is enabled.

use std::time::Duration;

use rvm_core::HardwareCommand;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatcher::{Controller, ms};
use crate::timers::TimerKind;

impl Controller {
    pub(crate) fn mark_compactor_running(&mut self) {
        if !self.state.compactor.running {
            self.state.compactor.running = true;
            self.state.compactor.started_at = Some(Instant::now());
        }
        self.timers.schedule(
            TimerKind::CompactorIdle,
            ms(self.config.compactor.idle_stop_ms),
        );
    }

    pub(crate) fn mark_compactor_stopped(&mut self) {
        if let Some(started) = self.state.compactor.started_at.take() {
            debug!(ran_ms = started.elapsed().as_millis() as u64, "Compactor stopped");
        }
        self.state.compactor.running = false;
        self.timers.cancel(TimerKind::CompactorIdle);
    }

    /// An item went into a bin: start the compactor or extend its run.
    pub(crate) async fn on_item_accepted(&mut self) {
        // An item that lands during teardown does not start the compactor.
        if !self.state.auto_cycle_enabled || self.state.tearing_down {
            return;
        }
        if self.state.compactor.running {
            self.mark_compactor_running();
            return;
        }
        match self.hw.send(&HardwareCommand::CompactorStart).await {
            Ok(()) => {
                info!("Compactor started");
                self.mark_compactor_running();
            }
            Err(e) => warn!(error = %e, "Compactor start failed"),
        }
    }

    pub(crate) async fn on_compactor_idle(&mut self) {
        if self.state.compactor.running {
            info!(
                idle_ms = self.config.compactor.idle_stop_ms,
                "No new items, stopping compactor"
            );
            self.stop_compactor(None).await;
        }
    }

    /// Stop the compactor, optionally letting it finish for `grace` first.
    /// A failed stop command still counts as stopped.
    pub(crate) async fn stop_compactor(&mut self, grace: Option<Duration>) {
        if !self.state.compactor.running {
            return;
        }
        if let Some(grace) = grace {
            tokio::time::sleep(grace).await;
        }
        self.hw.best_effort(&HardwareCommand::CompactorStop).await;
        self.mark_compactor_stopped();
    }
}
