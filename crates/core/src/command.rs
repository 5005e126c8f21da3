//! Operator commands accepted by the dispatcher.
//!
//! The wire shape is `{"action": "...", ...params}`. The camelCase action
//! names used by existing dashboards are accepted as aliases.

use serde::{Deserialize, Serialize};

use crate::hardware::HardwareCommand;
use crate::material::BinKind;
use crate::session::SessionStart;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorCommand {
    #[serde(alias = "startSession")]
    StartSession {
        #[serde(flatten)]
        start: SessionStart,
    },
    #[serde(alias = "getStatus")]
    GetStatus,
    #[serde(alias = "getBinStatus")]
    GetBinStatus,
    #[serde(alias = "resetBinStatus")]
    ResetBinStatus {
        #[serde(default)]
        params: BinReset,
    },
    /// Maintenance: mark a bin as full without the sensor firing.
    #[serde(alias = "testBinFull")]
    TestBinFull {
        #[serde(default, alias = "binCode")]
        bin_code: u8,
    },
    #[serde(alias = "getDetectionStats")]
    GetDetectionStats,
    #[serde(alias = "emergencyStop")]
    EmergencyStop,
    #[serde(alias = "forceReset")]
    ForceReset,
    #[serde(alias = "endSession")]
    EndSession,
    #[serde(alias = "runDiagnostics")]
    RunDiagnostics,
    #[serde(alias = "restartScanner", alias = "restartInputScanner")]
    RestartInputScanner,
    /// Raw hardware pass-through.
    Maintenance { command: HardwareCommand },
}

impl OperatorCommand {
    /// Commands that must be rejected until the device has a module id.
    pub fn requires_provisioning(&self) -> bool {
        matches!(
            self,
            OperatorCommand::StartSession { .. } | OperatorCommand::Maintenance { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::StartSession { .. } => "start_session",
            OperatorCommand::GetStatus => "get_status",
            OperatorCommand::GetBinStatus => "get_bin_status",
            OperatorCommand::ResetBinStatus { .. } => "reset_bin_status",
            OperatorCommand::TestBinFull { .. } => "test_bin_full",
            OperatorCommand::GetDetectionStats => "get_detection_stats",
            OperatorCommand::EmergencyStop => "emergency_stop",
            OperatorCommand::ForceReset => "force_reset",
            OperatorCommand::EndSession => "end_session",
            OperatorCommand::RunDiagnostics => "run_diagnostics",
            OperatorCommand::RestartInputScanner => "restart_input_scanner",
            OperatorCommand::Maintenance { .. } => "maintenance",
        }
    }
}

/// Which bins a reset-bin-status command clears.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinReset {
    #[serde(default, alias = "resetAll")]
    pub reset_all: bool,
    #[serde(default, alias = "binCode", skip_serializing_if = "Option::is_none")]
    pub bin_code: Option<u8>,
}

impl BinReset {
    pub fn all() -> Self {
        Self {
            reset_all: true,
            bin_code: None,
        }
    }

    pub fn bin(bin: BinKind) -> Self {
        Self {
            reset_all: false,
            bin_code: Some(bin.code()),
        }
    }

    /// Resolve to the concrete bins to clear. An unknown code clears nothing.
    pub fn targets(&self) -> Vec<BinKind> {
        if self.reset_all {
            return BinKind::ALL.to_vec();
        }
        self.bin_code
            .and_then(BinKind::from_code)
            .into_iter()
            .collect()
    }
}
