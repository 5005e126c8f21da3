//! Session lifecycle: start, timeouts and teardown.
//!
//! Teardown never blocks the loop on a moving item. If the belt or sorter
//! is in motion it parks as [`PendingTeardown`] and finishes when the cycle
//! comes to rest, or when the wait limit fires.

use chrono::Utc;
use rvm_core::error::SessionError;
use rvm_core::{BeltMotion, HardwareCommand, Session, SessionStart, SorterPosition, TimeoutReason};
use rvm_telemetry::{Screen, TelemetryEvent};
use tracing::{debug, info, warn};

use crate::context::PendingTeardown;
use crate::dispatcher::{Controller, ms};
use crate::input::CommandOutcome;
use crate::timers::{CYCLE_TIMERS, SESSION_TIMERS, TimerKind};

impl Controller {
    pub(crate) async fn start_session(&mut self, start: SessionStart) -> CommandOutcome {
        if self.state.tearing_down {
            return self.reject("start_session", SessionError::TeardownInProgress);
        }
        if !self.ready() {
            return self.reject("start_session", SessionError::NotReady);
        }

        if self.state.session.is_some() {
            info!(
                previous = %self.state.session_id(),
                next = %start.session_id,
                "Session already active, tearing it down first"
            );
            self.state.pending_start = Some(start);
            self.teardown(true).await;
            return CommandOutcome::Accepted;
        }

        // A newer start supersedes one still waiting out the restart settle.
        self.timers.cancel(TimerKind::PendingStart);
        self.state.pending_start = None;
        self.open_session(start).await;
        CommandOutcome::Accepted
    }

    async fn open_session(&mut self, start: SessionStart) {
        let session_cfg = &self.config.session;
        let inactivity = chrono::Duration::milliseconds(session_cfg.inactivity_ms as i64);
        let max_duration = chrono::Duration::milliseconds(session_cfg.max_duration_ms as i64);
        let session = Session::open(start, inactivity, max_duration);

        info!(
            session_id = %session.session_id,
            kind = %session.kind,
            "Opening session"
        );

        self.state.reset_cycle();
        self.state.last_material = None;

        // Known hardware baseline before the gate opens.
        let gap = ms(self.config.timing.command_gap_ms);
        self.settle_sorter_reset().await;
        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
            .await;
        tokio::time::sleep(gap).await;
        self.hw.best_effort(&HardwareCommand::CompactorStop).await;
        self.mark_compactor_stopped();
        tokio::time::sleep(gap).await;
        self.hw
            .best_effort(&HardwareCommand::sorter(SorterPosition::Home))
            .await;
        tokio::time::sleep(ms(self.config.timing.home_settle_ms)).await;
        self.hw.best_effort(&HardwareCommand::Calibrate).await;
        tokio::time::sleep(gap).await;
        self.hw.best_effort(&HardwareCommand::OpenGate).await;

        self.tracker.record_session();
        self.bus.publish(TelemetryEvent::SessionStarted {
            session_id: session.session_id.clone(),
            session_code: session.session_code.clone(),
            kind: session.kind,
            member: session.member.clone(),
            timestamp: Utc::now(),
        });
        let greeting = match session.member.as_ref().and_then(|m| m.name.as_deref()) {
            Some(name) => format!("Welcome {name}, please insert your item"),
            None => "Please insert your item".to_string(),
        };
        self.bus
            .publish(TelemetryEvent::screen(Screen::SessionActive, greeting));

        self.state.session = Some(session);
        self.state.auto_cycle_enabled = true;
        self.state.trigger_armed = true;

        let session_cfg = &self.config.session;
        self.timers
            .schedule(TimerKind::Inactivity, ms(session_cfg.inactivity_ms));
        self.timers
            .schedule(TimerKind::MaxDuration, ms(session_cfg.max_duration_ms));
        self.timers
            .schedule(TimerKind::Photo, ms(session_cfg.start_settle_ms));
        self.publish_status();
    }

    pub(crate) async fn open_pending_start(&mut self) {
        let Some(start) = self.state.pending_start.take() else {
            return;
        };
        if self.state.session.is_some() || self.state.tearing_down || !self.ready() {
            warn!(session_id = %start.session_id, "Dropping deferred session start");
            return;
        }
        self.open_session(start).await;
    }

    pub(crate) async fn on_timeout(&mut self, reason: TimeoutReason) {
        let Some(session) = self.state.session.as_ref() else {
            return;
        };
        if self.state.tearing_down {
            debug!(%reason, "Timeout during teardown ignored");
            return;
        }

        info!(%reason, items = session.items_processed, "Session timeout");
        if session.items_processed > 0 {
            self.bus.publish(TelemetryEvent::SessionTimeout {
                session_id: session.session_id.clone(),
                reason,
                items_processed: session.items_processed,
                timestamp: Utc::now(),
            });
        }
        self.teardown(false).await;
    }

    /// End the session and return the machine to idle. Idempotent: a call
    /// while a teardown is already running is a no-op.
    pub(crate) async fn teardown(&mut self, force_compactor: bool) {
        if self.state.tearing_down {
            debug!("Teardown already in progress");
            return;
        }
        if self.state.session.is_none() {
            return;
        }
        self.state.tearing_down = true;
        info!(force_compactor, "Tearing down session");
        self.bus
            .publish(TelemetryEvent::screen(Screen::SessionEnding, "Thank you!"));

        // The gate sometimes misses the first close.
        self.hw.best_effort(&HardwareCommand::CloseGate).await;
        tokio::time::sleep(ms(self.config.timing.gate_settle_ms)).await;
        self.hw.best_effort(&HardwareCommand::CloseGate).await;

        self.state.trigger_armed = false;
        self.timers.cancel_all(&[
            TimerKind::Photo,
            TimerKind::Inactivity,
            TimerKind::MaxDuration,
            TimerKind::BinFull,
        ]);

        if self.state.cycle.phase.is_in_motion() {
            info!(phase = %self.state.cycle.phase, "Waiting for in-flight item");
            self.state.teardown_pending = Some(PendingTeardown { force_compactor });
            self.timers.schedule(
                TimerKind::TeardownLimit,
                ms(self.config.session.teardown_wait_limit_ms),
            );
            return;
        }

        self.abandon_cycle();
        self.finish_teardown(force_compactor).await;
    }

    pub(crate) async fn on_teardown_limit(&mut self) {
        let Some(pending) = self.state.teardown_pending else {
            return;
        };
        warn!(phase = %self.state.cycle.phase, "In-flight item did not settle, abandoning it");
        self.abandon_cycle();
        self.finish_teardown(pending.force_compactor).await;
    }

    /// Drop the in-flight item without completing it.
    pub(crate) fn abandon_cycle(&mut self) {
        if !self.state.cycle.is_idle() {
            debug!(phase = %self.state.cycle.phase, "Abandoning item cycle");
        }
        self.timers.cancel_all(&CYCLE_TIMERS);
        self.state.reset_cycle();
    }

    pub(crate) async fn finish_teardown(&mut self, force_compactor: bool) {
        self.timers.cancel(TimerKind::TeardownLimit);
        self.state.teardown_pending = None;

        self.settle_sorter_reset().await;

        let grace = (!force_compactor).then(|| ms(self.config.compactor.grace_ms));
        self.stop_compactor(grace).await;
        // Only now: the compactor is stopped.
        self.state.auto_cycle_enabled = false;

        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
            .await;

        if let Some(session) = self.state.session.take() {
            let duration = Utc::now() - session.started_at;
            info!(
                session_id = %session.session_id,
                items = session.items_processed,
                duration_secs = duration.num_seconds(),
                "Session ended"
            );
            self.bus.publish(TelemetryEvent::SessionEnded {
                session_id: session.session_id,
                items_processed: session.items_processed,
                duration_secs: duration.num_seconds(),
                timestamp: Utc::now(),
            });
        }
        self.bus.publish(TelemetryEvent::ResetComplete {
            timestamp: Utc::now(),
        });

        let pending_start = self.state.pending_start.is_some();
        self.timers.cancel_all(&SESSION_TIMERS);
        self.state.reset_cycle();
        self.state.last_material = None;
        self.state.tearing_down = false;

        info!("Reset complete, ready for next session");
        self.publish_ready();

        if pending_start {
            self.timers.schedule(
                TimerKind::PendingStart,
                ms(self.config.session.restart_settle_ms),
            );
        }
    }
}
