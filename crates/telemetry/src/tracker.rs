//! Bin, detection and cycle-timing counters.
//!
//! Shared between the controller (the only writer) and the operator API
//! (reader). Counters accumulate for the life of the process; bin flags
//! persist across sessions and only clear on an explicit reset.

use chrono::{DateTime, Utc};
use rvm_core::BinKind;
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-bin full flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinStatus {
    pub plastic: bool,
    pub metal: bool,
    pub secondary: bool,
    pub glass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BinStatus {
    fn flag_mut(&mut self, bin: BinKind) -> &mut bool {
        match bin {
            BinKind::Plastic => &mut self.plastic,
            BinKind::Metal => &mut self.metal,
            BinKind::Secondary => &mut self.secondary,
            BinKind::Glass => &mut self.glass,
        }
    }

    pub fn is_full(&self, bin: BinKind) -> bool {
        match bin {
            BinKind::Plastic => self.plastic,
            BinKind::Metal => self.metal,
            BinKind::Secondary => self.secondary,
            BinKind::Glass => self.glass,
        }
    }

    pub fn set(&mut self, bin: BinKind, full: bool) {
        *self.flag_mut(bin) = full;
        self.updated_at = Some(Utc::now());
    }

    pub fn full_bins(&self) -> Vec<BinKind> {
        BinKind::ALL
            .into_iter()
            .filter(|b| self.is_full(*b))
            .collect()
    }
}

/// Detection outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub attempts: u64,
    pub first_try: u64,
    pub second_try: u64,
    /// Success on the third capture or later.
    pub third_try: u64,
    pub failures: u64,
    pub total_retries: u64,
    /// Retried items that succeeded after the belt nudged them under the camera.
    pub positioning_helped: u64,
}

impl DetectionStats {
    pub fn record_success(&mut self, retries: u32, positioned: bool) {
        self.attempts += 1;
        self.total_retries += u64::from(retries);
        match retries {
            0 => self.first_try += 1,
            1 => self.second_try += 1,
            _ => self.third_try += 1,
        }
        if positioned && retries > 0 {
            self.positioning_helped += 1;
        }
    }

    pub fn record_failure(&mut self, retries: u32) {
        self.attempts += 1;
        self.failures += 1;
        self.total_retries += u64::from(retries);
    }

    pub fn average_retries(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_retries as f64 / self.attempts as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            (self.attempts - self.failures) as f64 / self.attempts as f64
        }
    }
}

/// Cycle durations and session counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleTiming {
    pub last_cycle_ms: Option<u64>,
    pub average_cycle_ms: Option<u64>,
    pub cycles: u64,
    pub sessions: u64,
    #[serde(skip)]
    total_cycle_ms: u64,
}

impl CycleTiming {
    pub fn record_cycle(&mut self, duration_ms: u64) {
        self.cycles += 1;
        self.total_cycle_ms += duration_ms;
        self.last_cycle_ms = Some(duration_ms);
        self.average_cycle_ms = Some(self.total_cycle_ms / self.cycles);
    }

    pub fn record_session(&mut self) {
        self.sessions += 1;
    }
}

/// Thread-safe holder for every operator-visible counter.
pub struct TelemetryTracker {
    bins: RwLock<BinStatus>,
    detection: RwLock<DetectionStats>,
    timing: RwLock<CycleTiming>,
    /// Log a detection summary every N attempts.
    summary_every: u64,
}

// Counters are plain data; a writer that panicked mid-update leaves them
// usable, so poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl TelemetryTracker {
    pub fn new(summary_every: u64) -> Self {
        Self {
            bins: RwLock::new(BinStatus::default()),
            detection: RwLock::new(DetectionStats::default()),
            timing: RwLock::new(CycleTiming::default()),
            summary_every,
        }
    }

    // ── Bins ──────────────────────────────────────────────────────────

    pub fn mark_bin_full(&self, bin: BinKind) {
        write(&self.bins).set(bin, true);
    }

    /// Clear the given bins. Returns the bins that were actually full.
    pub fn reset_bins(&self, bins: &[BinKind]) -> Vec<BinKind> {
        let mut status = write(&self.bins);
        let mut cleared = Vec::new();
        for bin in bins {
            if status.is_full(*bin) {
                cleared.push(*bin);
            }
            status.set(*bin, false);
        }
        cleared
    }

    pub fn is_bin_full(&self, bin: BinKind) -> bool {
        read(&self.bins).is_full(bin)
    }

    pub fn bins(&self) -> BinStatus {
        read(&self.bins).clone()
    }

    // ── Detection ─────────────────────────────────────────────────────

    pub fn record_detection_success(&self, retries: u32, positioned: bool) {
        let mut stats = write(&self.detection);
        stats.record_success(retries, positioned);
        self.maybe_log_summary(&stats);
    }

    pub fn record_detection_failure(&self, retries: u32) {
        let mut stats = write(&self.detection);
        stats.record_failure(retries);
        self.maybe_log_summary(&stats);
    }

    fn maybe_log_summary(&self, stats: &DetectionStats) {
        if self.summary_every == 0 || stats.attempts % self.summary_every != 0 {
            return;
        }
        tracing::info!(
            attempts = stats.attempts,
            first_try = stats.first_try,
            second_try = stats.second_try,
            third_try = stats.third_try,
            failures = stats.failures,
            avg_retries = format!("{:.2}", stats.average_retries()),
            positioning_helped = stats.positioning_helped,
            "Detection summary"
        );
    }

    pub fn detection(&self) -> DetectionStats {
        read(&self.detection).clone()
    }

    // ── Timing ────────────────────────────────────────────────────────

    pub fn record_cycle(&self, duration_ms: u64) {
        write(&self.timing).record_cycle(duration_ms);
    }

    pub fn record_session(&self) {
        write(&self.timing).record_session();
    }

    pub fn timing(&self) -> CycleTiming {
        read(&self.timing).clone()
    }
}

impl Default for TelemetryTracker {
    fn default() -> Self {
        Self::new(10)
    }
}
