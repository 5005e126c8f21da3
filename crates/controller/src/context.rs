//! The controller's owned run state.
//!
//! One value of [`RunState`] exists per controller; only the controller loop
//! touches it. Nothing here survives a restart.

use std::collections::VecDeque;
use std::time::Duration;

use rvm_core::{
    Classification, CyclePhase, Material, Session, SessionStart, SorterPosition, WeightReading,
};
use tokio::time::Instant;

/// Detector task ids remembered for duplicate detection.
const RECENT_TASKS: usize = 32;

/// What the pending weight reading will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightIntent {
    /// Classified item: route it if heavy enough.
    Accept,
    /// Retries exhausted: reject it only if something is actually there.
    Probe,
}

/// The single in-flight item.
#[derive(Debug, Clone)]
pub struct ItemCycle {
    pub phase: CyclePhase,
    /// Bumped whenever a cycle starts or is abandoned.
    pub epoch: u64,
    pub started_at: Option<Instant>,
    pub classification: Option<Classification>,
    pub weight: Option<WeightReading>,
    pub retries: u32,
    pub calibration_attempts: u32,
    /// The belt nudged this item under the camera before the first capture.
    pub positioned: bool,
    /// Belt positioning is in progress; the capture has not been issued yet.
    pub positioning: bool,
    pub weight_intent: WeightIntent,
    pub sorter_target: Option<SorterPosition>,
}

impl ItemCycle {
    pub fn idle(epoch: u64) -> Self {
        Self {
            phase: CyclePhase::Idle,
            epoch,
            started_at: None,
            classification: None,
            weight: None,
            retries: 0,
            calibration_attempts: 0,
            positioned: false,
            positioning: false,
            weight_intent: WeightIntent::Accept,
            sorter_target: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == CyclePhase::Idle
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or_default()
    }
}

/// One issued photo capture still waiting for its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    pub epoch: u64,
    pub seq: u64,
    pub issued_at: Instant,
}

/// How an arriving classification lines up with the issued captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMatch {
    /// Answers a capture of the current item.
    Current(Capture),
    /// Answers a capture of an item that has since been finished or dropped.
    Stale(Capture),
    /// The detector delivered the same task again.
    Duplicate { epoch: u64 },
    /// No capture is waiting for an answer.
    Unsolicited,
}

/// Captures waiting for a classification, oldest first.
///
/// The camera answers in the order it was asked, so an arriving result
/// belongs to the oldest capture still outstanding. Captures that outlive
/// the expiry are presumed lost.
#[derive(Debug, Default)]
pub struct CaptureLedger {
    pending: VecDeque<Capture>,
    next_seq: u64,
    recent_tasks: VecDeque<(String, u64)>,
}

impl CaptureLedger {
    pub fn issue(&mut self, epoch: u64) -> u64 {
        self.next_seq += 1;
        self.pending.push_back(Capture {
            epoch,
            seq: self.next_seq,
            issued_at: Instant::now(),
        });
        self.next_seq
    }

    /// Forget a capture the camera never accepted.
    pub fn withdraw(&mut self, seq: u64) {
        self.pending.retain(|c| c.seq != seq);
    }

    pub fn outstanding(&self, epoch: u64) -> usize {
        self.pending.iter().filter(|c| c.epoch == epoch).count()
    }

    /// Match one classification against the oldest outstanding capture.
    pub fn resolve(&mut self, epoch: u64, task_id: Option<&str>, expiry: Duration) -> CaptureMatch {
        if let Some(task) = task_id
            && let Some((_, seen)) = self.recent_tasks.iter().find(|(t, _)| t == task)
        {
            return CaptureMatch::Duplicate { epoch: *seen };
        }

        while self
            .pending
            .front()
            .is_some_and(|c| c.issued_at.elapsed() > expiry)
        {
            self.pending.pop_front();
        }
        let Some(capture) = self.pending.pop_front() else {
            return CaptureMatch::Unsolicited;
        };

        if let Some(task) = task_id {
            if self.recent_tasks.len() == RECENT_TASKS {
                self.recent_tasks.pop_front();
            }
            self.recent_tasks.push_back((task.to_string(), capture.epoch));
        }

        if capture.epoch == epoch {
            // One answer settles the item; later answers to its retries are moot.
            self.pending.retain(|c| c.epoch != epoch);
            CaptureMatch::Current(capture)
        } else {
            CaptureMatch::Stale(capture)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompactorState {
    pub running: bool,
    pub started_at: Option<Instant>,
}

/// Teardown in progress, waiting for a moving cycle to come to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTeardown {
    pub force_compactor: bool,
}

pub struct RunState {
    /// Latched by an emergency stop until a force reset.
    pub estopped: bool,
    pub session: Option<Session>,
    /// Session cycling is on. Cleared only after the compactor has stopped.
    pub auto_cycle_enabled: bool,
    /// New photos may be armed. Cleared first thing in teardown.
    pub trigger_armed: bool,
    pub tearing_down: bool,
    pub teardown_pending: Option<PendingTeardown>,
    /// A start request that forced the previous session down.
    pub pending_start: Option<SessionStart>,
    pub cycle: ItemCycle,
    /// Outlives individual cycles so late answers can be told apart.
    pub captures: CaptureLedger,
    pub compactor: CompactorState,
    /// Most recent known classification in this session; decides which bin
    /// is "in play" for bin-full handling.
    pub last_material: Option<Material>,
    pub module_id_retries: u32,
    next_epoch: u64,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            estopped: false,
            session: None,
            auto_cycle_enabled: false,
            trigger_armed: false,
            tearing_down: false,
            teardown_pending: None,
            pending_start: None,
            cycle: ItemCycle::idle(0),
            captures: CaptureLedger::default(),
            compactor: CompactorState::default(),
            last_material: None,
            module_id_retries: 0,
            next_epoch: 1,
        }
    }

    /// Replace the cycle with a fresh idle one under a new epoch.
    pub fn reset_cycle(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.cycle = ItemCycle::idle(epoch);
        epoch
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some() && self.auto_cycle_enabled
    }

    pub fn busy(&self) -> bool {
        self.session.is_some() || self.tearing_down
    }

    pub fn session_id(&self) -> String {
        self.session
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default()
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_cycle_bumps_epoch() {
        let mut state = RunState::new();
        let first = state.reset_cycle();
        state.cycle.phase = CyclePhase::AwaitingPhoto;
        state.cycle.retries = 2;
        let second = state.reset_cycle();

        assert!(second > first);
        assert!(state.cycle.is_idle());
        assert_eq!(state.cycle.retries, 0);
    }

    const EXPIRY: Duration = Duration::from_secs(20);

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_matched_to_the_abandoned_item() {
        let mut ledger = CaptureLedger::default();
        ledger.issue(1);
        let current = ledger.issue(2);

        match ledger.resolve(2, Some("old"), EXPIRY) {
            CaptureMatch::Stale(capture) => assert_eq!(capture.epoch, 1),
            other => panic!("Expected stale, got {other:?}"),
        }
        match ledger.resolve(2, Some("new"), EXPIRY) {
            CaptureMatch::Current(capture) => assert_eq!(capture.seq, current),
            other => panic!("Expected current, got {other:?}"),
        }
        assert_eq!(ledger.resolve(2, None, EXPIRY), CaptureMatch::Unsolicited);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_task_is_a_duplicate() {
        let mut ledger = CaptureLedger::default();
        ledger.issue(3);
        ledger.issue(4);

        assert!(matches!(
            ledger.resolve(4, Some("t-1"), EXPIRY),
            CaptureMatch::Stale(_)
        ));
        assert_eq!(
            ledger.resolve(4, Some("t-1"), EXPIRY),
            CaptureMatch::Duplicate { epoch: 3 }
        );
        assert_eq!(ledger.outstanding(4), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_captures_expire() {
        let mut ledger = CaptureLedger::default();
        ledger.issue(1);
        tokio::time::advance(EXPIRY + Duration::from_secs(1)).await;
        ledger.issue(2);

        assert!(matches!(
            ledger.resolve(2, None, EXPIRY),
            CaptureMatch::Current(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn one_answer_settles_every_retry_of_the_item() {
        let mut ledger = CaptureLedger::default();
        ledger.issue(5);
        let withdrawn = ledger.issue(5);
        ledger.issue(5);
        ledger.withdraw(withdrawn);
        assert_eq!(ledger.outstanding(5), 2);

        assert!(matches!(
            ledger.resolve(5, None, EXPIRY),
            CaptureMatch::Current(_)
        ));
        assert_eq!(ledger.outstanding(5), 0);
    }

    #[test]
    fn fresh_state_is_not_busy() {
        let state = RunState::default();
        assert!(!state.busy());
        assert!(!state.session_active());
        assert!(state.session_id().is_empty());
    }
}
