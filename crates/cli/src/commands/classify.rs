//! `rvm classify` — run one detector result through the classifier offline.

use std::path::Path;

use rvm_classifier::{Classifier, ClassifierConfig, Outcome, Verdict};

use super::load_config;

pub fn run(
    config_path: Option<&Path>,
    label: &str,
    confidence: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence must be in [0, 1], got {confidence}").into());
    }

    let config = load_config(config_path)?;
    let classifier = Classifier::new(ClassifierConfig::from(&config.detection));
    let verdict = classifier.evaluate(label, confidence);

    println!("🔎 {label:?} @ {confidence:.2}");
    for line in describe(&verdict) {
        println!("   {line}");
    }
    Ok(())
}

fn describe(verdict: &Verdict) -> Vec<String> {
    let mut lines = vec![format!("Material: {}", verdict.material)];

    match verdict.label_match {
        Some(m) => lines.push(format!("Pattern:  {:?} label, {:?} match", m.format, m.strength)),
        None => lines.push("Pattern:  none".to_string()),
    }

    lines.push(match verdict.outcome {
        Outcome::Accepted => "Outcome:  accepted".to_string(),
        Outcome::AcceptedRelaxed { bar } => format!("Outcome:  accepted on relaxed bar {bar:.3}"),
        Outcome::BelowThreshold { threshold } => {
            format!("Outcome:  below threshold {threshold:.3}")
        }
        Outcome::NoiseFloor => "Outcome:  below noise floor (bad photo)".to_string(),
        Outcome::Unrecognized => "Outcome:  unrecognized".to_string(),
    });

    match verdict.material.bin() {
        Some(bin) => lines.push(format!("Bin:      {bin}")),
        None => lines.push("Bin:      none (item would be rejected)".to_string()),
    }

    lines
}
