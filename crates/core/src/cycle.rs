//! Item-cycle data: the phase an item is in, and what was measured about it.

use serde::{Deserialize, Serialize};

use crate::material::Material;

/// Phase of the single in-flight item cycle.
///
/// ```text
/// Idle -> AwaitingPhoto -> AwaitingWeight -> Routing -> Dropping -> Reset -> Idle
///              \                 \
///               `----------------`--> Rejecting -> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    AwaitingPhoto,
    AwaitingWeight,
    Routing,
    Dropping,
    Reset,
    Rejecting,
}

impl CyclePhase {
    /// Phases in which the belt or sorter is physically moving. Teardown waits
    /// for these instead of abandoning them.
    pub fn is_in_motion(self) -> bool {
        matches!(
            self,
            CyclePhase::Routing | CyclePhase::Dropping | CyclePhase::Reset | CyclePhase::Rejecting
        )
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::AwaitingPhoto => "awaiting_photo",
            CyclePhase::AwaitingWeight => "awaiting_weight",
            CyclePhase::Routing => "routing",
            CyclePhase::Dropping => "dropping",
            CyclePhase::Reset => "reset",
            CyclePhase::Rejecting => "rejecting",
        };
        f.write_str(s)
    }
}

/// Result of running a raw detector label through the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub material: Material,
    pub confidence: f64,
    pub label: String,
    /// Detector correlation id, if the firmware sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Classification {
    /// Confidence as a rounded percentage, the way operators read it.
    pub fn match_rate(&self) -> u32 {
        (self.confidence * 100.0).round().clamp(0.0, 100.0) as u32
    }
}

/// A weight reading with the scale's calibration coefficient applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    pub grams: f64,
    pub raw: f64,
    pub coefficient: f64,
}

impl WeightReading {
    /// `grams = raw * coefficient / 1000`, rounded to 0.1 g.
    pub fn from_raw(raw: f64, coefficient: f64) -> Self {
        let calibrated = raw * (coefficient / 1000.0);
        Self {
            grams: (calibrated * 10.0).round() / 10.0,
            raw,
            coefficient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_applies_coefficient_and_rounds() {
        let reading = WeightReading::from_raw(25.0, 988.0);
        assert_eq!(reading.grams, 24.7);
        assert_eq!(reading.raw, 25.0);
    }

    #[test]
    fn zero_raw_weight_stays_zero() {
        assert_eq!(WeightReading::from_raw(0.0, 988.0).grams, 0.0);
    }

    #[test]
    fn motion_phases() {
        assert!(CyclePhase::Routing.is_in_motion());
        assert!(CyclePhase::Rejecting.is_in_motion());
        assert!(!CyclePhase::AwaitingPhoto.is_in_motion());
        assert!(!CyclePhase::Idle.is_in_motion());
    }

    #[test]
    fn match_rate_rounds() {
        let c = Classification {
            material: Material::MetalCan,
            confidence: 0.456,
            label: "1-can".into(),
            task_id: None,
        };
        assert_eq!(c.match_rate(), 46);
    }
}
