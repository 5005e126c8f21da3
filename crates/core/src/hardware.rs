//! Hardware seam — the commands the controller issues and the events the
//! kiosk pushes back.
//!
//! A [`HardwareGateway`] connects the controller to the machine's local API.
//! It sends one command at a time and resolves once the API acknowledges it.
//! Anything the machine reports asynchronously (classification results,
//! weight readings, bin-full signals) arrives separately as a
//! [`HardwareEvent`] on the event feed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HardwareError;
use crate::material::Material;

/// Module identity assigned by the hardware controller once per boot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub String);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeltMotion {
    /// Short forward nudge that puts the item under the camera/scale.
    ToCamera,
    /// Forward run that delivers the item onto the sorter.
    ToSorter,
    Reverse,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SorterPosition {
    Home,
    MetalCan,
    PlasticBottle,
}

impl SorterPosition {
    /// Sorter target for an accepted material. Everything that is not a can
    /// goes down the plastic chute.
    pub fn for_material(material: Material) -> Self {
        match material {
            Material::MetalCan => SorterPosition::MetalCan,
            _ => SorterPosition::PlasticBottle,
        }
    }
}

/// Physical channel a command acts on. Two commands on different channels
/// may be in flight at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareChannel {
    Gate,
    Belt,
    Sorter,
    Compactor,
    Camera,
    Scale,
    System,
}

/// A single command against the local hardware API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HardwareCommand {
    OpenGate,
    CloseGate,
    Belt { motion: BeltMotion },
    Sorter { position: SorterPosition },
    CompactorStart,
    CompactorStop,
    CapturePhoto,
    ReadWeight,
    Calibrate,
    /// Maintenance pass-through for an arbitrary motor code pair.
    CustomMotor { motor_id: String, motor_type: String },
}

impl HardwareCommand {
    pub fn belt(motion: BeltMotion) -> Self {
        HardwareCommand::Belt { motion }
    }

    pub fn sorter(position: SorterPosition) -> Self {
        HardwareCommand::Sorter { position }
    }

    /// Short name used in logs and error messages.
    pub fn action(&self) -> &'static str {
        match self {
            HardwareCommand::OpenGate => "open_gate",
            HardwareCommand::CloseGate => "close_gate",
            HardwareCommand::Belt { motion } => match motion {
                BeltMotion::ToCamera => "belt_to_camera",
                BeltMotion::ToSorter => "belt_to_sorter",
                BeltMotion::Reverse => "belt_reverse",
                BeltMotion::Stop => "belt_stop",
            },
            HardwareCommand::Sorter { .. } => "sorter",
            HardwareCommand::CompactorStart => "compactor_start",
            HardwareCommand::CompactorStop => "compactor_stop",
            HardwareCommand::CapturePhoto => "capture_photo",
            HardwareCommand::ReadWeight => "read_weight",
            HardwareCommand::Calibrate => "calibrate",
            HardwareCommand::CustomMotor { .. } => "custom_motor",
        }
    }

    pub fn channel(&self) -> HardwareChannel {
        match self {
            HardwareCommand::OpenGate | HardwareCommand::CloseGate => HardwareChannel::Gate,
            HardwareCommand::Belt { .. } => HardwareChannel::Belt,
            HardwareCommand::Sorter { .. } => HardwareChannel::Sorter,
            HardwareCommand::CompactorStart | HardwareCommand::CompactorStop => {
                HardwareChannel::Compactor
            }
            HardwareCommand::CapturePhoto => HardwareChannel::Camera,
            HardwareCommand::ReadWeight | HardwareCommand::Calibrate => HardwareChannel::Scale,
            HardwareCommand::CustomMotor { .. } => HardwareChannel::System,
        }
    }
}

/// An unsolicited notification from the hardware event feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HardwareEvent {
    ModuleReady {
        module_id: ModuleId,
    },
    Classified {
        label: String,
        confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    Weight {
        raw: f64,
    },
    BinFull {
        code: u8,
    },
    /// Belt or sorter reached its limit switch.
    LimitReached,
}

/// The core hardware gateway trait.
///
/// Implementations handle transport, payload encoding and per-request
/// timeouts. The controller enforces the provisioning rule before calling
/// [`HardwareGateway::send`], so implementations may assume a module id.
#[async_trait]
pub trait HardwareGateway: Send + Sync {
    /// Human-readable gateway name (e.g., "local-api", "scripted").
    fn name(&self) -> &str;

    /// Issue one command and wait for the API to acknowledge it.
    async fn send(&self, module: &ModuleId, command: &HardwareCommand)
    -> Result<(), HardwareError>;

    /// Ask the hardware to announce its module id. The answer arrives as a
    /// [`HardwareEvent::ModuleReady`] on the event feed.
    async fn request_module_id(&self) -> Result<(), HardwareError>;

    /// Is the local API reachable?
    async fn health_check(&self) -> Result<bool, HardwareError> {
        Ok(true)
    }
}
