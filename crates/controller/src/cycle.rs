//! The item cycle: photo, classify, weigh, then route or reject.
//!
//! Every step is driven by a timer or a hardware event fed back through the
//! controller loop. Events that do not fit the current phase are stale and
//! dropped. Hardware failures inside a step are logged and the step counts
//! as done, so the cycle always comes back to idle.

use chrono::Utc;
use rvm_config::PositioningStrategy;
use rvm_core::{
    BeltMotion, BinKind, Classification, CyclePhase, HardwareCommand, Material, SorterPosition,
    WeightReading,
};
use rvm_telemetry::{Screen, TelemetryEvent};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::{CaptureMatch, WeightIntent};
use crate::dispatcher::{Controller, ms};
use crate::timers::TimerKind;

impl Controller {
    fn may_arm_photo(&self) -> bool {
        self.state.session_active()
            && self.state.trigger_armed
            && !self.state.tearing_down
            && !self.state.estopped
    }

    // ── Photo ─────────────────────────────────────────────────────────

    pub(crate) async fn on_photo_timer(&mut self) {
        if !self.may_arm_photo() {
            return;
        }
        match self.state.cycle.phase {
            CyclePhase::Idle => self.arm_photo().await,
            // Retry of an unrecognized item.
            CyclePhase::AwaitingPhoto if !self.state.cycle.positioning => {
                self.capture_photo().await
            }
            phase => debug!(%phase, "Photo trigger while busy, ignored"),
        }
    }

    async fn arm_photo(&mut self) {
        let epoch = self.state.reset_cycle();
        self.state.cycle.phase = CyclePhase::AwaitingPhoto;
        self.state.cycle.started_at = Some(Instant::now());
        debug!(epoch, "Item cycle armed");

        if self.config.detection.position_before_photo {
            self.state.cycle.positioning = true;
            self.state.cycle.positioned = true;
            self.hw
                .best_effort(&HardwareCommand::belt(BeltMotion::ToCamera))
                .await;
            self.timers.schedule(
                TimerKind::Positioned,
                ms(self.config.timing.belt_to_camera_ms),
            );
        } else {
            self.capture_photo().await;
        }
    }

    pub(crate) async fn on_positioned(&mut self) {
        if self.state.cycle.phase != CyclePhase::AwaitingPhoto || !self.state.cycle.positioning {
            return;
        }
        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
            .await;
        tokio::time::sleep(ms(self.config.timing.position_settle_ms)).await;
        self.state.cycle.positioning = false;
        self.capture_photo().await;
    }

    async fn capture_photo(&mut self) {
        let seq = self.state.captures.issue(self.state.cycle.epoch);
        debug!(attempt = self.state.cycle.retries + 1, seq, "Capturing photo");
        if !self.hw.best_effort(&HardwareCommand::CapturePhoto).await {
            self.state.captures.withdraw(seq);
        }
        self.timers.schedule(
            TimerKind::PhotoTimeout,
            ms(self.config.timing.photo_timeout_ms),
        );
    }

    pub(crate) async fn on_classified(
        &mut self,
        label: String,
        confidence: f64,
        task_id: Option<String>,
    ) {
        let verdict = self.classifier.evaluate(&label, confidence);
        let classification = Classification {
            material: verdict.material,
            confidence,
            label,
            task_id,
        };
        info!(
            label = %classification.label,
            confidence,
            material = %classification.material,
            outcome = ?verdict.outcome,
            "Classification"
        );
        self.bus.publish(TelemetryEvent::AiResult {
            label: classification.label.clone(),
            confidence,
            match_rate: classification.match_rate(),
            material: classification.material,
            task_id: classification.task_id.clone(),
            timestamp: Utc::now(),
        });

        let expiry = ms(self.config.timing.capture_expiry_ms);
        let epoch = self.state.cycle.epoch;
        match self
            .state
            .captures
            .resolve(epoch, classification.task_id.as_deref(), expiry)
        {
            CaptureMatch::Current(capture) => debug!(seq = capture.seq, "Classification matched"),
            CaptureMatch::Stale(capture) => {
                info!(
                    seq = capture.seq,
                    capture_epoch = capture.epoch,
                    epoch,
                    "Classification for an earlier item discarded"
                );
                return;
            }
            CaptureMatch::Duplicate { epoch: seen } => {
                debug!(
                    task_id = ?classification.task_id,
                    epoch = seen,
                    "Duplicate classification discarded"
                );
                return;
            }
            CaptureMatch::Unsolicited => {
                debug!("Classification with no capture outstanding discarded");
                return;
            }
        }

        if self.state.cycle.phase != CyclePhase::AwaitingPhoto
            || self.state.cycle.positioning
            || !self.state.session_active()
        {
            debug!(phase = %self.state.cycle.phase, "Stale classification discarded");
            return;
        }
        self.timers.cancel(TimerKind::PhotoTimeout);
        self.on_detection(classification).await;
    }

    pub(crate) async fn on_photo_timeout(&mut self) {
        if self.state.cycle.phase != CyclePhase::AwaitingPhoto {
            return;
        }
        warn!(attempt = self.state.cycle.retries + 1, "No classification arrived");
        self.on_detection(Classification {
            material: Material::Unknown,
            confidence: 0.0,
            label: String::new(),
            task_id: None,
        })
        .await;
    }

    async fn on_detection(&mut self, classification: Classification) {
        let retries = self.state.cycle.retries;

        if classification.material.is_known() {
            self.tracker
                .record_detection_success(retries, self.state.cycle.positioned);
            self.state.last_material = Some(classification.material);
            self.state.cycle.classification = Some(classification);
            self.await_weight(WeightIntent::Accept);
            return;
        }

        self.state.cycle.retries += 1;
        if self.state.cycle.retries < self.config.detection.max_retries {
            info!(
                retries = self.state.cycle.retries,
                max = self.config.detection.max_retries,
                "Item not recognized, retrying"
            );
            self.timers.schedule(
                TimerKind::Photo,
                ms(self.config.detection.retry_delay_ms),
            );
            return;
        }

        info!(retries = self.state.cycle.retries, "Retries exhausted, checking for an item");
        self.tracker.record_detection_failure(self.state.cycle.retries);
        self.state.cycle.classification = Some(classification);
        self.await_weight(WeightIntent::Probe);
    }

    // ── Weight ────────────────────────────────────────────────────────

    fn await_weight(&mut self, intent: WeightIntent) {
        self.state.cycle.phase = CyclePhase::AwaitingWeight;
        self.state.cycle.weight_intent = intent;
        self.timers.schedule(
            TimerKind::WeightRequest,
            ms(self.config.timing.weight_request_ms),
        );
    }

    pub(crate) async fn request_weight(&mut self) {
        if self.state.cycle.phase != CyclePhase::AwaitingWeight {
            return;
        }
        self.hw.best_effort(&HardwareCommand::ReadWeight).await;
        self.timers.schedule(
            TimerKind::WeightTimeout,
            ms(self.config.timing.weight_timeout_ms),
        );
    }

    pub(crate) async fn on_weight(&mut self, raw: f64) {
        let reading = WeightReading::from_raw(raw, self.config.weight.coefficient);
        self.bus.publish(TelemetryEvent::WeightResult {
            grams: reading.grams,
            raw: reading.raw,
            coefficient: reading.coefficient,
            timestamp: Utc::now(),
        });

        if self.state.cycle.phase != CyclePhase::AwaitingWeight
            || !self.state.session_active()
            || !self.timers.is_armed(TimerKind::WeightTimeout)
        {
            debug!(raw, phase = %self.state.cycle.phase, "Unrequested weight discarded");
            return;
        }
        self.timers.cancel(TimerKind::WeightTimeout);
        info!(grams = reading.grams, raw, "Weight");

        if reading.grams <= 0.0
            && self.state.cycle.calibration_attempts < self.config.detection.max_calibration_attempts
        {
            self.state.cycle.calibration_attempts += 1;
            warn!(attempt = self.state.cycle.calibration_attempts, "Zero weight, recalibrating");
            self.hw.best_effort(&HardwareCommand::Calibrate).await;
            self.timers.schedule(
                TimerKind::WeightRequest,
                ms(self.config.timing.calibration_ms),
            );
            return;
        }

        self.state.cycle.weight = Some(reading);

        if reading.grams < self.config.detection.min_valid_weight {
            info!(
                grams = reading.grams,
                min = self.config.detection.min_valid_weight,
                "Nothing on the belt"
            );
            self.abandon_and_rearm().await;
            return;
        }

        let material = self
            .state
            .cycle
            .classification
            .as_ref()
            .map(|c| c.material)
            .unwrap_or(Material::Unknown);
        if self.state.cycle.weight_intent == WeightIntent::Probe || !material.is_known() {
            self.begin_rejection().await;
        } else {
            self.begin_routing(material).await;
        }
    }

    pub(crate) async fn on_weight_timeout(&mut self) {
        if self.state.cycle.phase != CyclePhase::AwaitingWeight {
            return;
        }
        warn!("No weight reading arrived, abandoning item");
        self.abandon_and_rearm().await;
    }

    async fn abandon_and_rearm(&mut self) {
        self.abandon_cycle();
        self.after_cycle().await;
    }

    // ── Motion ────────────────────────────────────────────────────────

    async fn begin_routing(&mut self, material: Material) {
        let position = SorterPosition::for_material(material);
        info!(%material, ?position, "Routing item");
        self.state.cycle.sorter_target = Some(position);
        self.state.cycle.phase = CyclePhase::Routing;
        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::ToSorter))
            .await;
        self.await_motion(self.config.timing.belt_to_sorter_ms);
    }

    /// Wait for a belt or sorter move to finish, either for a fixed time or
    /// for the limit switch with the signal timeout as fallback.
    fn await_motion(&mut self, fixed_ms: u64) {
        let delay = match self.config.positioning.strategy {
            PositioningStrategy::FixedDelay => fixed_ms,
            PositioningStrategy::HardwareSignal => self.config.positioning.signal_timeout_ms,
        };
        self.timers.schedule(TimerKind::Motion, ms(delay));
    }

    pub(crate) async fn on_limit_reached(&mut self) {
        // A belt reversal always runs its fixed time.
        if self.config.positioning.strategy != PositioningStrategy::HardwareSignal
            || !self.state.cycle.phase.is_in_motion()
            || self.state.cycle.phase == CyclePhase::Rejecting
            || !self.timers.is_armed(TimerKind::Motion)
        {
            debug!(phase = %self.state.cycle.phase, "Limit switch ignored");
            return;
        }
        self.timers.cancel(TimerKind::Motion);
        self.on_motion_arrived().await;
    }

    pub(crate) async fn on_motion_arrived(&mut self) {
        match self.state.cycle.phase {
            CyclePhase::Routing => {
                self.hw
                    .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
                    .await;
                // The previous item's sorter return must be done before moving it again.
                self.settle_sorter_reset().await;
                let target = self.state.cycle.sorter_target.unwrap_or(SorterPosition::PlasticBottle);
                self.hw.best_effort(&HardwareCommand::sorter(target)).await;
                self.state.cycle.phase = CyclePhase::Dropping;
                self.await_motion(self.config.timing.sorter_rotate_ms);
            }
            CyclePhase::Dropping => {
                tokio::time::sleep(ms(self.config.timing.drop_settle_ms)).await;
                self.state.cycle.phase = CyclePhase::Reset;
                let home = HardwareCommand::sorter(SorterPosition::Home);
                if self.config.cycle.overlap_sorter_reset {
                    if let Err(e) = self.hw.spawn_tracked(home) {
                        warn!(error = %e, "Sorter home not issued");
                    }
                    self.complete_cycle().await;
                } else {
                    self.hw.best_effort(&home).await;
                    self.await_motion(self.config.timing.sorter_reset_ms);
                }
            }
            CyclePhase::Reset => self.complete_cycle().await,
            CyclePhase::Rejecting => {
                self.hw
                    .best_effort(&HardwareCommand::belt(BeltMotion::Stop))
                    .await;
                self.complete_rejection().await;
            }
            phase => debug!(%phase, "Motion timer outside a move, ignored"),
        }
    }

    // ── Completion ────────────────────────────────────────────────────

    async fn complete_cycle(&mut self) {
        let cycle_ms = self.state.cycle.elapsed_ms();
        let retries = self.state.cycle.retries;
        let material = self
            .state
            .cycle
            .classification
            .as_ref()
            .map(|c| c.material)
            .unwrap_or(Material::Unknown);
        let weight_grams = self.state.cycle.weight.map(|w| w.grams).unwrap_or_default();
        self.tracker.record_cycle(cycle_ms);

        let inactivity = chrono::Duration::milliseconds(self.config.session.inactivity_ms as i64);
        let mut item = None;
        if let Some(session) = self.state.session.as_mut() {
            session.items_processed += 1;
            session.touch(inactivity);
            item = Some((session.session_id.clone(), session.items_processed));
        }
        if !self.state.tearing_down {
            self.timers.schedule(
                TimerKind::Inactivity,
                ms(self.config.session.inactivity_ms),
            );
        }

        if let Some((session_id, item_number)) = item {
            info!(item_number, %material, weight_grams, retries, cycle_ms, "Item accepted");
            self.bus.publish(TelemetryEvent::CycleComplete {
                session_id,
                item_number,
                material,
                weight_grams,
                retries,
                cycle_ms,
                timestamp: Utc::now(),
            });
            self.bus.publish(TelemetryEvent::screen(
                Screen::ItemAccepted,
                format!("Item {item_number} accepted"),
            ));
        }

        self.on_item_accepted().await;
        self.state.reset_cycle();
        self.after_cycle().await;
    }

    async fn begin_rejection(&mut self) {
        let grams = self.state.cycle.weight.map(|w| w.grams).unwrap_or_default();
        info!(grams, retries = self.state.cycle.retries, "Rejecting item");
        self.state.cycle.phase = CyclePhase::Rejecting;
        self.hw
            .best_effort(&HardwareCommand::belt(BeltMotion::Reverse))
            .await;
        self.timers.schedule(
            TimerKind::Motion,
            ms(self.config.timing.belt_reverse_ms),
        );
    }

    async fn complete_rejection(&mut self) {
        let weight_grams = self.state.cycle.weight.map(|w| w.grams).unwrap_or_default();
        self.bus.publish(TelemetryEvent::ItemRejected {
            session_id: self.state.session_id(),
            weight_grams,
            retries: self.state.cycle.retries,
            timestamp: Utc::now(),
        });
        self.bus.publish(TelemetryEvent::screen(
            Screen::ItemRejected,
            "Item not recognized, please take it back",
        ));
        self.state.reset_cycle();
        self.after_cycle().await;
    }

    /// The cycle is back at idle: finish a waiting teardown or re-arm.
    async fn after_cycle(&mut self) {
        if let Some(pending) = self.state.teardown_pending {
            self.finish_teardown(pending.force_compactor).await;
            return;
        }
        if self.may_arm_photo() {
            self.timers.schedule(
                TimerKind::Photo,
                ms(self.config.timing.photo_rearm_ms),
            );
        }
    }

    // ── Bins ──────────────────────────────────────────────────────────

    pub(crate) fn on_bin_full(&mut self, code: u8) {
        let Some(bin) = BinKind::from_code(code) else {
            debug!(code, "Unknown bin code ignored");
            return;
        };
        warn!(%bin, code, "Bin full");
        self.tracker.mark_bin_full(bin);
        self.publish_bins(Some(bin));
        self.bus.publish(TelemetryEvent::screen(
            Screen::BinFullWarning,
            format!("{} bin is full", bin.display_name()),
        ));

        if !bin.is_critical() || !self.state.session_active() || self.state.tearing_down {
            return;
        }
        let in_play = match self.state.last_material {
            Some(Material::MetalCan) => BinKind::Metal,
            _ => BinKind::Plastic,
        };
        if bin == in_play {
            warn!(%bin, "Bin in play is full, ending session");
            self.timers.schedule(
                TimerKind::BinFull,
                ms(self.config.session.bin_full_delay_ms),
            );
        }
    }
}
