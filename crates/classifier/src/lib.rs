//! Material classifier.
//!
//! Turns the detector's free-text class name and probability into a
//! [`Material`]. Labels come in three generations:
//!
//! - **Canonical** short codes: `0-pet`, `1-can`
//! - **Variant** spellings of the short codes: `0_plastic`, `1 aluminum`
//! - **Legacy** bilingual keywords: `易拉罐`, `pet`, `bottle`, `玻璃`, ...
//!
//! The first pattern that matches decides the category. Whether a
//! low-confidence match is still accepted depends on the match strength and
//! on the relaxation factor configured for the label's generation.

use std::sync::LazyLock;

use regex_lite::Regex;
use rvm_config::DetectionConfig;
use rvm_core::Material;
use serde::{Deserialize, Serialize};

/// How strongly a label pattern implies its material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrength {
    Strong,
    Weak,
}

/// Which label generation matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelFormat {
    Canonical,
    Variant,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatch {
    pub material: Material,
    pub strength: MatchStrength,
    pub format: LabelFormat,
}

impl LabelMatch {
    const fn new(material: Material, strength: MatchStrength, format: LabelFormat) -> Self {
        Self {
            material,
            strength,
            format,
        }
    }
}

static PLASTIC_VARIANT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^0[-_\s]*(pet|plastic|bottle)").ok());
static METAL_VARIANT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^1[-_\s]*(can|metal|aluminum|aluminium)").ok());

fn variant_matches(re: &LazyLock<Option<Regex>>, label: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(label))
}

/// Run the ordered pattern table against a label. The label is normalized
/// (trimmed, lowercased) first.
pub fn match_label(raw_label: &str) -> Option<LabelMatch> {
    use LabelFormat::*;
    use MatchStrength::*;

    let label = raw_label.trim().to_lowercase();
    if label.is_empty() {
        return None;
    }

    if label.starts_with("1-can") {
        return Some(LabelMatch::new(Material::MetalCan, Strong, Canonical));
    }
    if label.starts_with("0-pet") {
        return Some(LabelMatch::new(Material::PlasticBottle, Strong, Canonical));
    }

    if variant_matches(&METAL_VARIANT, &label) {
        return Some(LabelMatch::new(Material::MetalCan, Strong, Variant));
    }
    if variant_matches(&PLASTIC_VARIANT, &label) {
        return Some(LabelMatch::new(Material::PlasticBottle, Strong, Variant));
    }

    let has = |needle: &str| label.contains(needle);

    if has("易拉罐") || has("铝") {
        Some(LabelMatch::new(Material::MetalCan, Strong, Legacy))
    } else if has("pet") {
        Some(LabelMatch::new(Material::PlasticBottle, Strong, Legacy))
    } else if has("瓶") {
        Some(LabelMatch::new(Material::PlasticBottle, Weak, Legacy))
    } else if has("metal") || has("can") {
        Some(LabelMatch::new(Material::MetalCan, Weak, Legacy))
    } else if has("plastic") || has("bottle") {
        Some(LabelMatch::new(Material::PlasticBottle, Weak, Legacy))
    } else if has("玻璃") {
        Some(LabelMatch::new(Material::Glass, Strong, Legacy))
    } else if has("glass") {
        Some(LabelMatch::new(Material::Glass, Weak, Legacy))
    } else {
        None
    }
}

/// Thresholds and relaxation factors the classifier runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub metal_can_threshold: f64,
    pub plastic_bottle_threshold: f64,
    pub glass_threshold: f64,
    pub noise_floor: f64,
    pub relax_factor_canonical: f64,
    pub relax_factor_legacy: f64,
}

impl ClassifierConfig {
    pub fn threshold(&self, material: Material) -> f64 {
        match material {
            Material::MetalCan => self.metal_can_threshold,
            Material::PlasticBottle => self.plastic_bottle_threshold,
            Material::Glass => self.glass_threshold,
            Material::Unknown => 1.0,
        }
    }

    /// Short codes and their variant spellings share the canonical factor.
    pub fn relax_factor(&self, format: LabelFormat) -> f64 {
        match format {
            LabelFormat::Canonical | LabelFormat::Variant => self.relax_factor_canonical,
            LabelFormat::Legacy => self.relax_factor_legacy,
        }
    }
}

impl From<&DetectionConfig> for ClassifierConfig {
    fn from(d: &DetectionConfig) -> Self {
        Self {
            metal_can_threshold: d.metal_can_threshold,
            plastic_bottle_threshold: d.plastic_bottle_threshold,
            glass_threshold: d.glass_threshold,
            noise_floor: d.noise_floor,
            relax_factor_canonical: d.relax_factor_canonical,
            relax_factor_legacy: d.relax_factor_legacy,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

/// Why the classifier settled on its answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    AcceptedRelaxed { bar: f64 },
    BelowThreshold { threshold: f64 },
    /// No pattern matched and the detector was barely confident: a bad photo.
    NoiseFloor,
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub material: Material,
    pub label_match: Option<LabelMatch>,
    pub outcome: Outcome,
}

/// The material classifier. Pure; holds only its configuration.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(&self, label: &str, confidence: f64) -> Material {
        self.evaluate(label, confidence).material
    }

    /// Classify and report how the decision was reached.
    pub fn evaluate(&self, label: &str, confidence: f64) -> Verdict {
        let Some(m) = match_label(label) else {
            let outcome = if confidence < self.config.noise_floor {
                Outcome::NoiseFloor
            } else {
                Outcome::Unrecognized
            };
            tracing::debug!(label, confidence, ?outcome, "Label did not match any pattern");
            return Verdict {
                material: Material::Unknown,
                label_match: None,
                outcome,
            };
        };

        let threshold = self.config.threshold(m.material);
        if confidence >= threshold {
            return Verdict {
                material: m.material,
                label_match: Some(m),
                outcome: Outcome::Accepted,
            };
        }

        let bar = threshold * self.config.relax_factor(m.format);
        if m.strength == MatchStrength::Strong && confidence >= bar {
            tracing::debug!(label, confidence, bar, material = %m.material, "Accepted on relaxed bar");
            return Verdict {
                material: m.material,
                label_match: Some(m),
                outcome: Outcome::AcceptedRelaxed { bar },
            };
        }

        tracing::debug!(label, confidence, threshold, material = %m.material, "Below threshold");
        Verdict {
            material: Material::Unknown,
            label_match: Some(m),
            outcome: Outcome::BelowThreshold { threshold },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(ClassifierConfig {
            metal_can_threshold: 0.22,
            plastic_bottle_threshold: 0.30,
            glass_threshold: 0.25,
            noise_floor: 0.15,
            relax_factor_canonical: 0.7,
            relax_factor_legacy: 0.8,
        })
    }

    #[test]
    fn canonical_can_above_threshold() {
        assert_eq!(classifier().classify("1-can", 0.5), Material::MetalCan);
        assert_eq!(classifier().classify("  1-Can  ", 0.5), Material::MetalCan);
    }

    #[test]
    fn weak_plastic_below_threshold_is_unknown() {
        let verdict = classifier().evaluate("plastic bottle", 0.10);
        assert_eq!(verdict.material, Material::Unknown);
        assert_eq!(
            verdict.outcome,
            Outcome::BelowThreshold { threshold: 0.30 }
        );
    }

    #[test]
    fn unmatched_labels_are_unknown_at_any_confidence() {
        let c = classifier();
        for conf in [0.0, 0.05, 0.14] {
            let verdict = c.evaluate("banana", conf);
            assert_eq!(verdict.material, Material::Unknown);
            assert_eq!(verdict.outcome, Outcome::NoiseFloor);
        }
        assert_eq!(c.evaluate("banana", 0.9).outcome, Outcome::Unrecognized);
        assert_eq!(c.classify("", 0.01), Material::Unknown);
    }

    #[test]
    fn strong_match_accepted_on_relaxed_bar() {
        // 0.22 * 0.7 = 0.154
        let verdict = classifier().evaluate("1-can", 0.16);
        assert_eq!(verdict.material, Material::MetalCan);
        assert!(matches!(verdict.outcome, Outcome::AcceptedRelaxed { .. }));

        assert_eq!(classifier().classify("1-can", 0.15), Material::Unknown);
    }

    #[test]
    fn weak_match_never_relaxed() {
        // "metal" is weak; 0.21 clears 0.22 * 0.8 but not the threshold.
        assert_eq!(classifier().classify("metal", 0.21), Material::Unknown);
        assert_eq!(classifier().classify("metal", 0.22), Material::MetalCan);
    }

    #[test]
    fn variant_spellings() {
        let m = match_label("0_plastic").unwrap();
        assert_eq!(m.material, Material::PlasticBottle);
        assert_eq!(m.format, LabelFormat::Variant);

        let m = match_label("1 aluminum").unwrap();
        assert_eq!(m.material, Material::MetalCan);
        assert_eq!(m.strength, MatchStrength::Strong);
    }

    #[test]
    fn legacy_keywords() {
        assert_eq!(match_label("易拉罐").unwrap().material, Material::MetalCan);
        assert_eq!(match_label("铝罐").unwrap().strength, MatchStrength::Strong);

        let pet = match_label("pet").unwrap();
        assert_eq!(pet.material, Material::PlasticBottle);
        assert_eq!(pet.strength, MatchStrength::Strong);

        assert_eq!(match_label("塑料瓶").unwrap().strength, MatchStrength::Weak);
        assert_eq!(match_label("玻璃").unwrap().material, Material::Glass);
        assert_eq!(match_label("glass").unwrap().strength, MatchStrength::Weak);
        assert!(match_label("cardboard").is_none());
    }

    #[test]
    fn legacy_relaxation_uses_legacy_factor() {
        // pet is strong legacy: 0.30 * 0.8 = 0.24
        assert_eq!(classifier().classify("pet", 0.25), Material::PlasticBottle);
        assert_eq!(classifier().classify("pet", 0.23), Material::Unknown);
    }

    #[test]
    fn below_noise_floor_without_match_is_always_unknown() {
        let c = classifier();
        let labels = ["", "x", "paper", "cup", "水", "123"];
        let mut conf = 0.0;
        while conf < 0.15 {
            for label in labels {
                assert_eq!(c.classify(label, conf), Material::Unknown, "{label} @ {conf}");
            }
            conf += 0.01;
        }
    }

    #[test]
    fn config_from_detection_defaults() {
        let config = ClassifierConfig::default();
        assert_eq!(config.threshold(Material::MetalCan), 0.22);
        assert_eq!(config.relax_factor(LabelFormat::Variant), 0.7);
        assert_eq!(config.relax_factor(LabelFormat::Legacy), 0.8);
    }
}
