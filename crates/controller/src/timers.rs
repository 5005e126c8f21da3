//! Timers as scheduled inputs.
//!
//! A timer is a spawned sleep that posts [`Input::Timer`] back into the
//! controller's own queue. Each schedule gets a fresh token; a firing whose
//! token no longer matches the armed one was cancelled or replaced and is
//! dropped by [`Timers::fire`].

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::input::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Arm the next photo capture.
    Photo,
    /// Belt finished nudging the item under the camera.
    Positioned,
    PhotoTimeout,
    WeightRequest,
    WeightTimeout,
    /// Belt or sorter travel time (or limit-switch fallback).
    Motion,
    CompactorIdle,
    Inactivity,
    MaxDuration,
    BinFull,
    TeardownLimit,
    /// Open the session that pre-empted the previous one.
    PendingStart,
    Heartbeat,
}

/// Timers that belong to the running session and item cycle.
pub const SESSION_TIMERS: [TimerKind; 12] = [
    TimerKind::Photo,
    TimerKind::Positioned,
    TimerKind::PhotoTimeout,
    TimerKind::WeightRequest,
    TimerKind::WeightTimeout,
    TimerKind::Motion,
    TimerKind::CompactorIdle,
    TimerKind::Inactivity,
    TimerKind::MaxDuration,
    TimerKind::BinFull,
    TimerKind::TeardownLimit,
    TimerKind::PendingStart,
];

/// Timers of the in-flight item cycle only.
pub const CYCLE_TIMERS: [TimerKind; 6] = [
    TimerKind::Photo,
    TimerKind::Positioned,
    TimerKind::PhotoTimeout,
    TimerKind::WeightRequest,
    TimerKind::WeightTimeout,
    TimerKind::Motion,
];

pub struct Timers {
    // Weak so pending timers never keep the controller queue open.
    tx: mpsc::WeakSender<Input>,
    next_token: u64,
    armed: HashMap<TimerKind, (u64, JoinHandle<()>)>,
}

impl Timers {
    pub fn new(tx: mpsc::WeakSender<Input>) -> Self {
        Self {
            tx,
            next_token: 0,
            armed: HashMap::new(),
        }
    }

    /// Arm `kind` to fire after `delay`, replacing any pending one.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        self.next_token += 1;
        let token = self.next_token;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Input::Timer { kind, token }).await;
            }
        });
        self.armed.insert(kind, (token, handle));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.armed.remove(&kind) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self, kinds: &[TimerKind]) {
        for kind in kinds {
            self.cancel(*kind);
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Consume a firing. `false` means it is stale and must be ignored.
    pub fn fire(&mut self, kind: TimerKind, token: u64) -> bool {
        match self.armed.get(&kind) {
            Some((armed, _)) if *armed == token => {
                self.armed.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub fn armed_kinds(&self) -> Vec<TimerKind> {
        let mut kinds: Vec<_> = self.armed.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for (_, handle) in self.armed.values() {
            handle.abort();
        }
    }
}
