//! Operator-facing telemetry events.
//!
//! Everything the controller wants the outside world to know about is one
//! of these. The operator API streams them as JSON; the daemon logs them.

use chrono::{DateTime, Utc};
use rvm_core::{
    BinKind, CyclePhase, Material, MemberInfo, SessionKind, TimeoutReason,
};
use serde::{Deserialize, Serialize};

use crate::tracker::{BinStatus, CycleTiming, DetectionStats};

/// Coarse device state reported in status heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// No module id yet.
    Provisioning,
    Ready,
    /// A session is open or being torn down.
    Busy,
    /// Emergency stop latched; a force reset clears it.
    Stopped,
    Offline,
}

/// Screen the kiosk UI should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    WaitingForSession,
    SessionActive,
    ItemAccepted,
    ItemRejected,
    BinFullWarning,
    SessionEnding,
    OutOfService,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    pub state: DeviceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub items_processed: u32,
    pub cycle_phase: CyclePhase,
    pub auto_cycle_enabled: bool,
    pub compactor_running: bool,
    pub bins: BinStatus,
    pub timing: CycleTiming,
    pub detection: DetectionStats,
    pub timestamp: DateTime<Utc>,
}

/// Full diagnostics dump requested by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub status: StatusSnapshot,
    pub gateway: String,
    pub gateway_healthy: bool,
    pub tearing_down: bool,
    pub retries: u32,
    pub calibration_attempts: u32,
    pub pending_timers: Vec<String>,
    pub sorter_reset_in_flight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Periodic heartbeat, also published on status requests.
    Status(Box<StatusSnapshot>),

    /// First module id of this boot arrived.
    StartupReady {
        module_id: String,
        timestamp: DateTime<Utc>,
    },

    ScreenHint {
        screen: Screen,
        message: String,
        timestamp: DateTime<Utc>,
    },

    SessionStarted {
        session_id: String,
        session_code: String,
        kind: SessionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member: Option<MemberInfo>,
        timestamp: DateTime<Utc>,
    },

    /// Published only when the session accepted at least one item.
    SessionTimeout {
        session_id: String,
        reason: TimeoutReason,
        items_processed: u32,
        timestamp: DateTime<Utc>,
    },

    SessionEnded {
        session_id: String,
        items_processed: u32,
        duration_secs: i64,
        timestamp: DateTime<Utc>,
    },

    /// Hardware is back in its idle baseline after a teardown.
    ResetComplete { timestamp: DateTime<Utc> },

    CycleComplete {
        session_id: String,
        item_number: u32,
        material: Material,
        weight_grams: f64,
        retries: u32,
        cycle_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ItemRejected {
        session_id: String,
        weight_grams: f64,
        retries: u32,
        timestamp: DateTime<Utc>,
    },

    AiResult {
        label: String,
        confidence: f64,
        match_rate: u32,
        material: Material,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    WeightResult {
        grams: f64,
        raw: f64,
        coefficient: f64,
        timestamp: DateTime<Utc>,
    },

    BinStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        changed: Option<BinKind>,
        bins: BinStatus,
        timestamp: DateTime<Utc>,
    },

    DetectionStats {
        stats: DetectionStats,
        timestamp: DateTime<Utc>,
    },

    Diagnostics(Box<DiagnosticsReport>),

    EmergencyStop { timestamp: DateTime<Utc> },

    /// The session-start input (scanner) was re-armed.
    InputRearmed { timestamp: DateTime<Utc> },

    /// A fire-and-track hardware call failed after its caller moved on.
    HardwareFault {
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An operator command was refused or ignored.
    CommandRejected {
        command: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl TelemetryEvent {
    /// Event name as it appears in the JSON `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::Status(_) => "status",
            TelemetryEvent::StartupReady { .. } => "startup_ready",
            TelemetryEvent::ScreenHint { .. } => "screen_hint",
            TelemetryEvent::SessionStarted { .. } => "session_started",
            TelemetryEvent::SessionTimeout { .. } => "session_timeout",
            TelemetryEvent::SessionEnded { .. } => "session_ended",
            TelemetryEvent::ResetComplete { .. } => "reset_complete",
            TelemetryEvent::CycleComplete { .. } => "cycle_complete",
            TelemetryEvent::ItemRejected { .. } => "item_rejected",
            TelemetryEvent::AiResult { .. } => "ai_result",
            TelemetryEvent::WeightResult { .. } => "weight_result",
            TelemetryEvent::BinStatus { .. } => "bin_status",
            TelemetryEvent::DetectionStats { .. } => "detection_stats",
            TelemetryEvent::Diagnostics(_) => "diagnostics",
            TelemetryEvent::EmergencyStop { .. } => "emergency_stop",
            TelemetryEvent::InputRearmed { .. } => "input_rearmed",
            TelemetryEvent::HardwareFault { .. } => "hardware_fault",
            TelemetryEvent::CommandRejected { .. } => "command_rejected",
        }
    }

    pub fn screen(screen: Screen, message: impl Into<String>) -> Self {
        TelemetryEvent::ScreenHint {
            screen,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
