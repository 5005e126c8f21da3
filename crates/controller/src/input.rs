//! Everything that can wake the controller, and what it answers.

use rvm_core::{HardwareEvent, OperatorCommand};
use rvm_telemetry::{BinStatus, DetectionStats, DiagnosticsReport, StatusSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::timers::TimerKind;

/// One unit of work for the controller loop. Inputs are handled strictly
/// one at a time in arrival order.
#[derive(Debug)]
pub enum Input {
    Hardware(HardwareEvent),
    /// The event feed (re)connected.
    FeedConnected,
    Command {
        command: OperatorCommand,
        reply: Option<oneshot::Sender<CommandOutcome>>,
    },
    Timer {
        kind: TimerKind,
        token: u64,
    },
    /// Park the hardware and stop the loop.
    Shutdown { done: oneshot::Sender<()> },
}

/// Answer to an operator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted,
    Status(Box<StatusSnapshot>),
    Bins(BinStatus),
    Detection(DetectionStats),
    Diagnostics(Box<DiagnosticsReport>),
    /// Refused by policy (not ready, not provisioned, no session, ...).
    Rejected { reason: String },
    /// Accepted, but the hardware call failed.
    Failed { error: String },
}

impl CommandOutcome {
    pub fn rejected(reason: impl ToString) -> Self {
        CommandOutcome::Rejected {
            reason: reason.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(
            self,
            CommandOutcome::Rejected { .. } | CommandOutcome::Failed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::error::SessionError;

    #[test]
    fn rejected_outcome_serializes_reason() {
        let outcome = CommandOutcome::rejected(SessionError::NoActiveSession);
        assert!(!outcome.is_accepted());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["reason"], "No active session");
    }

    #[test]
    fn accepted_is_accepted() {
        assert!(CommandOutcome::Accepted.is_accepted());
        assert!(CommandOutcome::Bins(BinStatus::default()).is_accepted());
    }
}
