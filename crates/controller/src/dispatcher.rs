//! The controller loop: single owner of run state, single entry point for
//! hardware events, operator commands and timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rvm_classifier::{Classifier, ClassifierConfig};
use rvm_config::RvmConfig;
use rvm_core::error::{CommandError, HardwareError, SessionError};
use rvm_core::{
    BeltMotion, BinKind, HardwareCommand, HardwareEvent, HardwareGateway, ModuleId,
    OperatorCommand, SorterPosition, TimeoutReason,
};
use rvm_telemetry::{
    DeviceState, DiagnosticsReport, Screen, StatusSnapshot, TelemetryBus, TelemetryEvent,
    TelemetryTracker,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::context::RunState;
use crate::handle::ControllerHandle;
use crate::hardware::HardwareBus;
use crate::input::{CommandOutcome, Input};
use crate::timers::{SESSION_TIMERS, TimerKind, Timers};

const QUEUE_CAPACITY: usize = 256;

pub(crate) fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// The session and item-cycle controller.
///
/// Build one with [`Controller::new`], keep the returned handle, and drive
/// it with [`Controller::run`] on its own task.
pub struct Controller {
    pub(crate) config: Arc<RvmConfig>,
    pub(crate) classifier: Classifier,
    pub(crate) hw: HardwareBus,
    pub(crate) bus: TelemetryBus,
    pub(crate) tracker: Arc<TelemetryTracker>,
    pub(crate) state: RunState,
    pub(crate) timers: Timers,
    rx: mpsc::Receiver<Input>,
    module_tx: watch::Sender<Option<ModuleId>>,
}

impl Controller {
    pub fn new(
        config: Arc<RvmConfig>,
        gateway: Arc<dyn HardwareGateway>,
        bus: TelemetryBus,
        tracker: Arc<TelemetryTracker>,
    ) -> (Self, ControllerHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (module_tx, module_rx) = watch::channel(None);
        let classifier = Classifier::new(ClassifierConfig::from(&config.detection));
        let handle = ControllerHandle::new(tx.clone(), module_rx, bus.clone(), Arc::clone(&tracker));

        let controller = Self {
            config,
            classifier,
            hw: HardwareBus::new(gateway),
            bus,
            tracker,
            state: RunState::new(),
            timers: Timers::new(tx.downgrade()),
            rx,
            module_tx,
        };
        (controller, handle)
    }

    /// Process inputs until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            device = %self.config.device.id,
            gateway = self.hw.gateway_name(),
            "Controller started"
        );
        self.timers.schedule(
            TimerKind::Heartbeat,
            Duration::from_secs(self.config.heartbeat.interval_secs),
        );
        self.request_module_id().await;

        while let Some(input) = self.rx.recv().await {
            if let Input::Shutdown { done } = input {
                self.shutdown().await;
                let _ = done.send(());
                break;
            }
            self.handle(input).await;
        }
        info!("Controller stopped");
    }

    pub(crate) async fn handle(&mut self, input: Input) {
        match input {
            Input::Hardware(event) => self.on_hardware_event(event).await,
            Input::FeedConnected => {
                if !self.hw.is_provisioned() {
                    self.request_module_id().await;
                }
            }
            Input::Command { command, reply } => {
                let outcome = self.on_command(command).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Input::Timer { kind, token } => {
                if self.timers.fire(kind, token) {
                    self.on_timer(kind).await;
                } else {
                    debug!(?kind, "Discarding stale timer");
                }
            }
            Input::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(());
            }
        }

        debug_assert!(
            !self.state.compactor.running || self.state.auto_cycle_enabled,
            "compactor running outside an active session"
        );
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Photo => self.on_photo_timer().await,
            TimerKind::Positioned => self.on_positioned().await,
            TimerKind::PhotoTimeout => self.on_photo_timeout().await,
            TimerKind::WeightRequest => self.request_weight().await,
            TimerKind::WeightTimeout => self.on_weight_timeout().await,
            TimerKind::Motion => self.on_motion_arrived().await,
            TimerKind::CompactorIdle => self.on_compactor_idle().await,
            TimerKind::Inactivity => self.on_timeout(TimeoutReason::Inactivity).await,
            TimerKind::MaxDuration => self.on_timeout(TimeoutReason::MaxDuration).await,
            TimerKind::BinFull => self.on_timeout(TimeoutReason::BinFull).await,
            TimerKind::TeardownLimit => self.on_teardown_limit().await,
            TimerKind::PendingStart => self.open_pending_start().await,
            TimerKind::Heartbeat => self.on_heartbeat().await,
        }
    }

    async fn on_hardware_event(&mut self, event: HardwareEvent) {
        match event {
            HardwareEvent::ModuleReady { module_id } => self.on_module_ready(module_id),
            HardwareEvent::Classified {
                label,
                confidence,
                task_id,
            } => self.on_classified(label, confidence, task_id).await,
            HardwareEvent::Weight { raw } => self.on_weight(raw).await,
            HardwareEvent::BinFull { code } => self.on_bin_full(code),
            HardwareEvent::LimitReached => self.on_limit_reached().await,
        }
    }

    // ── Provisioning & heartbeat ──────────────────────────────────────

    async fn request_module_id(&mut self) {
        if let Err(e) = self.hw.request_module_id().await {
            warn!(error = %e, "Module id request failed");
        }
    }

    fn on_module_ready(&mut self, module_id: ModuleId) {
        let first = !self.hw.is_provisioned();
        if self.hw.module() == Some(&module_id) {
            return;
        }
        info!(module_id = %module_id, "Module id assigned");
        self.hw.set_module(module_id.clone());
        self.module_tx.send_replace(Some(module_id.clone()));
        self.state.module_id_retries = 0;

        if first {
            info!("System ready");
            self.bus.publish(TelemetryEvent::StartupReady {
                module_id: module_id.0,
                timestamp: Utc::now(),
            });
            self.publish_status();
            self.bus.publish(TelemetryEvent::screen(
                Screen::WaitingForSession,
                "Please scan your QR code",
            ));
            self.publish_bins(None);
        }
    }

    async fn on_heartbeat(&mut self) {
        self.timers.schedule(
            TimerKind::Heartbeat,
            Duration::from_secs(self.config.heartbeat.interval_secs),
        );

        if !self.hw.is_provisioned() {
            if self.state.module_id_retries < self.config.heartbeat.max_module_id_retries {
                self.state.module_id_retries += 1;
                info!(attempt = self.state.module_id_retries, "Still no module id, asking again");
                self.request_module_id().await;
            } else {
                warn!("Module id never arrived; check the local hardware service");
            }
        }

        let status = self.status_snapshot();
        debug!(
            state = ?status.state,
            session = status.session_id.is_some(),
            compactor = status.compactor_running,
            "Heartbeat"
        );
        self.bus.publish(TelemetryEvent::Status(Box::new(status)));
    }

    // ── Status ────────────────────────────────────────────────────────

    pub(crate) fn ready(&self) -> bool {
        self.hw.is_provisioned() && !self.state.estopped
    }

    fn device_state(&self) -> DeviceState {
        if !self.hw.is_provisioned() {
            DeviceState::Provisioning
        } else if self.state.estopped {
            DeviceState::Stopped
        } else if self.state.busy() {
            DeviceState::Busy
        } else {
            DeviceState::Ready
        }
    }

    pub(crate) fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            device_id: self.config.device.id.clone(),
            module_id: self.hw.module().map(|m| m.0.clone()),
            state: self.device_state(),
            session_id: self.state.session.as_ref().map(|s| s.session_id.clone()),
            items_processed: self
                .state
                .session
                .as_ref()
                .map(|s| s.items_processed)
                .unwrap_or_default(),
            cycle_phase: self.state.cycle.phase,
            auto_cycle_enabled: self.state.auto_cycle_enabled,
            compactor_running: self.state.compactor.running,
            bins: self.tracker.bins(),
            timing: self.tracker.timing(),
            detection: self.tracker.detection(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn publish_status(&self) {
        self.bus
            .publish(TelemetryEvent::Status(Box::new(self.status_snapshot())));
    }

    pub(crate) fn publish_bins(&self, changed: Option<BinKind>) {
        self.bus.publish(TelemetryEvent::BinStatus {
            changed,
            bins: self.tracker.bins(),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn publish_ready(&self) {
        self.bus.publish(TelemetryEvent::screen(
            Screen::WaitingForSession,
            "Please scan your QR code",
        ));
        self.bus.publish(TelemetryEvent::InputRearmed {
            timestamp: Utc::now(),
        });
        self.publish_status();
    }

    async fn diagnostics(&self) -> DiagnosticsReport {
        DiagnosticsReport {
            status: self.status_snapshot(),
            gateway: self.hw.gateway_name().to_string(),
            gateway_healthy: self.hw.health_check().await,
            tearing_down: self.state.tearing_down,
            retries: self.state.cycle.retries,
            calibration_attempts: self.state.cycle.calibration_attempts,
            pending_timers: self
                .timers
                .armed_kinds()
                .into_iter()
                .map(|k| format!("{k:?}"))
                .collect(),
            sorter_reset_in_flight: self.hw.has_tracked(),
        }
    }

    // ── Operator commands ─────────────────────────────────────────────

    pub(crate) fn reject(&self, command: &str, reason: impl std::fmt::Display) -> CommandOutcome {
        warn!(command, %reason, "Command refused");
        self.bus.publish(TelemetryEvent::CommandRejected {
            command: command.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        CommandOutcome::rejected(reason)
    }

    async fn on_command(&mut self, command: OperatorCommand) -> CommandOutcome {
        let name = command.name();
        debug!(command = name, "Operator command");

        if command.requires_provisioning() && !self.hw.is_provisioned() {
            return self.reject(name, HardwareError::NotProvisioned);
        }

        match command {
            OperatorCommand::StartSession { start } => self.start_session(start).await,
            OperatorCommand::GetStatus => {
                let status = self.status_snapshot();
                self.bus
                    .publish(TelemetryEvent::Status(Box::new(status.clone())));
                CommandOutcome::Status(Box::new(status))
            }
            OperatorCommand::GetBinStatus => {
                self.publish_bins(None);
                CommandOutcome::Bins(self.tracker.bins())
            }
            OperatorCommand::ResetBinStatus { params } => {
                let targets = params.targets();
                if targets.is_empty() {
                    return self.reject(
                        name,
                        CommandError::InvalidParams("no bin selected (use reset_all or a bin code 0-3)".into()),
                    );
                }
                let cleared = self.tracker.reset_bins(&targets);
                info!(?targets, ?cleared, "Bin status reset");
                self.publish_bins(None);
                CommandOutcome::Bins(self.tracker.bins())
            }
            OperatorCommand::TestBinFull { bin_code } => {
                if BinKind::from_code(bin_code).is_none() {
                    return self.reject(
                        name,
                        CommandError::InvalidParams(format!("unknown bin code {bin_code}")),
                    );
                }
                info!(bin_code, "Simulating bin full");
                self.on_bin_full(bin_code);
                CommandOutcome::Accepted
            }
            OperatorCommand::GetDetectionStats => {
                let stats = self.tracker.detection();
                self.bus.publish(TelemetryEvent::DetectionStats {
                    stats: stats.clone(),
                    timestamp: Utc::now(),
                });
                CommandOutcome::Detection(stats)
            }
            OperatorCommand::EmergencyStop => {
                self.emergency_stop().await;
                CommandOutcome::Accepted
            }
            OperatorCommand::ForceReset => self.force_reset().await,
            OperatorCommand::EndSession => self.end_session().await,
            OperatorCommand::RunDiagnostics => {
                let report = self.diagnostics().await;
                info!(
                    gateway_healthy = report.gateway_healthy,
                    timers = ?report.pending_timers,
                    "Diagnostics"
                );
                self.bus
                    .publish(TelemetryEvent::Diagnostics(Box::new(report.clone())));
                CommandOutcome::Diagnostics(Box::new(report))
            }
            OperatorCommand::RestartInputScanner => {
                if self.state.busy() {
                    return self.reject(name, "session in progress");
                }
                if !self.ready() {
                    return self.reject(name, SessionError::NotReady);
                }
                self.bus.publish(TelemetryEvent::InputRearmed {
                    timestamp: Utc::now(),
                });
                CommandOutcome::Accepted
            }
            OperatorCommand::Maintenance { command } => self.maintenance(command).await,
        }
    }

    async fn maintenance(&mut self, command: HardwareCommand) -> CommandOutcome {
        if command == HardwareCommand::CompactorStart && !self.state.auto_cycle_enabled {
            return self.reject("maintenance", "compactor only runs during a session");
        }
        info!(action = command.action(), "Maintenance command");
        match self.hw.send(&command).await {
            Ok(()) => {
                // Keep the tracked compactor state in step with the hardware.
                match command {
                    HardwareCommand::CompactorStart => self.mark_compactor_running(),
                    HardwareCommand::CompactorStop => self.mark_compactor_stopped(),
                    _ => {}
                }
                CommandOutcome::Accepted
            }
            Err(e) => {
                warn!(action = command.action(), error = %e, "Maintenance command failed");
                CommandOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn emergency_stop(&mut self) {
        warn!("EMERGENCY STOP");
        self.timers.cancel_all(&SESSION_TIMERS);
        self.state.trigger_armed = false;

        self.hw.best_effort(&HardwareCommand::CloseGate).await;
        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
            .await;
        self.hw.best_effort(&HardwareCommand::CompactorStop).await;
        self.mark_compactor_stopped();
        self.state.auto_cycle_enabled = false;

        self.state.estopped = true;
        self.state.session = None;
        self.state.tearing_down = false;
        self.state.teardown_pending = None;
        self.state.pending_start = None;
        self.state.last_material = None;
        self.state.reset_cycle();

        self.bus.publish(TelemetryEvent::EmergencyStop {
            timestamp: Utc::now(),
        });
        self.bus
            .publish(TelemetryEvent::screen(Screen::OutOfService, "Machine stopped"));
        self.publish_status();
    }

    async fn force_reset(&mut self) -> CommandOutcome {
        if self.state.tearing_down {
            return self.reject("force_reset", SessionError::TeardownInProgress);
        }
        info!("Force reset");
        self.state.estopped = false;

        if self.state.session.is_some() {
            self.teardown(true).await;
            return CommandOutcome::Accepted;
        }

        self.timers.cancel_all(&SESSION_TIMERS);
        self.settle_sorter_reset().await;
        self.hw.best_effort(&HardwareCommand::CloseGate).await;
        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
            .await;
        self.hw.best_effort(&HardwareCommand::CompactorStop).await;
        self.mark_compactor_stopped();
        self.state.auto_cycle_enabled = false;
        self.hw
            .best_effort(&HardwareCommand::sorter(SorterPosition::Home))
            .await;
        tokio::time::sleep(ms(self.config.timing.home_settle_ms)).await;
        self.state.reset_cycle();

        self.bus.publish(TelemetryEvent::ResetComplete {
            timestamp: Utc::now(),
        });
        self.publish_ready();
        CommandOutcome::Accepted
    }

    async fn end_session(&mut self) -> CommandOutcome {
        if self.state.tearing_down {
            return self.reject("end_session", SessionError::TeardownInProgress);
        }
        if self.state.session.is_none() {
            return self.reject("end_session", SessionError::NoActiveSession);
        }
        info!("Session ended by operator");
        self.teardown(false).await;
        CommandOutcome::Accepted
    }

    /// Collect the overlapped sorter-home call, surfacing a failure.
    pub(crate) async fn settle_sorter_reset(&mut self) {
        let limit = ms(self.config.timing.sorter_reset_ms);
        if let Some((action, error)) = self.hw.settle_tracked(limit).await {
            warn!(action, error = %error, "Tracked hardware call failed");
            self.bus.publish(TelemetryEvent::HardwareFault {
                action: action.to_string(),
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down controller");
        self.timers.cancel_all(&SESSION_TIMERS);
        self.timers.cancel(TimerKind::Heartbeat);
        self.state.trigger_armed = false;

        if self.hw.is_provisioned() {
            self.settle_sorter_reset().await;
            self.hw.best_effort(&HardwareCommand::CompactorStop).await;
            self.hw
                .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
                .await;
            self.hw.best_effort(&HardwareCommand::CloseGate).await;
        }
        self.mark_compactor_stopped();
        self.state.auto_cycle_enabled = false;
        self.state.session = None;
        self.state.reset_cycle();

        let mut status = self.status_snapshot();
        status.state = DeviceState::Offline;
        self.bus.publish(TelemetryEvent::Status(Box::new(status)));
    }
}
