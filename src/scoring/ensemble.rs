use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalizer::NormalizedClaim;

/// Capability every ensemble member exposes: a calibrated probability of the
/// positive (fraud) class for one feature vector. The scorer calls this
/// uniformly regardless of the underlying algorithm family.
pub trait Classifier: Send + Sync {
    fn predict_probability(&self, features: &[f64]) -> Result<f64, PredictError>;
}

/// Opaque inference failure reported by a classifier implementation.
#[derive(Debug)]
pub struct PredictError(pub String);

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PredictError {}

/// Per-model blend weights plus the decision threshold.
///
/// The weights are used exactly as persisted: the blended score is the raw
/// weighted sum with no normalization by the weight total. The decision
/// thresholds were calibrated against those raw sums, so renormalizing here
/// would silently shift every tier boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub weights: BTreeMap<String, f64>,
    pub threshold: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    #[error("no classifier loaded for configured model '{0}'")]
    ModelUnavailable(String),
    #[error("classifier '{model}' failed to produce a probability: {source}")]
    Inference {
        model: String,
        #[source]
        source: PredictError,
    },
}

/// Discrete fraud-risk category for a blended score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    #[serde(rename = "Bajo riesgo")]
    Low,
    #[serde(rename = "Riesgo medio")]
    Medium,
    #[serde(rename = "Alto riesgo")]
    High,
}

impl RiskTier {
    /// Exact half-open partition of the score space: `[.., t)` is low,
    /// `[t, t + 0.1)` medium, `[t + 0.1, ..)` high.
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score < threshold {
            Self::Low
        } else if score < threshold + 0.1 {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "Bajo riesgo",
            Self::Medium => "Riesgo medio",
            Self::High => "Alto riesgo",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Blends every configured model's probability into one score and maps it to
/// a tier. Every id named in the config must have a loaded classifier.
pub fn score_ensemble(
    features: &NormalizedClaim,
    classifiers: &BTreeMap<String, Box<dyn Classifier>>,
    config: &EnsembleConfig,
) -> Result<(f64, RiskTier), EnsembleError> {
    let mut score = 0.0;
    for (model, weight) in &config.weights {
        let classifier = classifiers
            .get(model)
            .ok_or_else(|| EnsembleError::ModelUnavailable(model.clone()))?;
        let probability = classifier
            .predict_probability(features.values())
            .map_err(|source| EnsembleError::Inference {
                model: model.clone(),
                source,
            })?;
        debug!(model = %model, probability, weight, "classifier vote");
        score += weight * probability;
    }

    Ok((score, RiskTier::from_score(score, config.threshold)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::normalize;
    use crate::scoring::schema::SchemaRegistry;
    use crate::scoring::{RawClaimRecord, RawValue};

    struct FixedProbability(f64);

    impl Classifier for FixedProbability {
        fn predict_probability(&self, _features: &[f64]) -> Result<f64, PredictError> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn predict_probability(&self, _features: &[f64]) -> Result<f64, PredictError> {
            Err(PredictError("tensor shape mismatch".to_string()))
        }
    }

    fn features() -> NormalizedClaim {
        let schema: SchemaRegistry =
            serde_json::from_str(r#"{"X": {"type": "numeric"}}"#).expect("schema parses");
        let mut record = RawClaimRecord::new();
        record.insert("X", RawValue::Number(1.0));
        normalize(&record, &schema, &["X".to_string()]).expect("normalizes")
    }

    fn config(threshold: f64) -> EnsembleConfig {
        let mut weights = BTreeMap::new();
        weights.insert("logreg".to_string(), 0.25);
        weights.insert("rf".to_string(), 0.75);
        EnsembleConfig { weights, threshold }
    }

    fn classifiers(first: f64, second: f64) -> BTreeMap<String, Box<dyn Classifier>> {
        let mut map: BTreeMap<String, Box<dyn Classifier>> = BTreeMap::new();
        map.insert("logreg".to_string(), Box::new(FixedProbability(first)));
        map.insert("rf".to_string(), Box::new(FixedProbability(second)));
        map
    }

    #[test]
    fn blends_with_raw_weights_without_normalizing() {
        let (score, _) =
            score_ensemble(&features(), &classifiers(0.8, 0.4), &config(0.4)).expect("scores");
        assert!((score - (0.25 * 0.8 + 0.75 * 0.4)).abs() < 1e-12);
    }

    #[test]
    fn weight_sum_above_one_is_used_as_is() {
        // Deliberately uncalibrated weights: the blend must not rescale them.
        let mut config = config(0.4);
        config.weights.insert("rf".to_string(), 2.0);
        let (score, _) =
            score_ensemble(&features(), &classifiers(1.0, 1.0), &config).expect("scores");
        assert!((score - 2.25).abs() < 1e-12);
    }

    #[test]
    fn missing_configured_model_is_fatal() {
        let mut classifiers = classifiers(0.5, 0.5);
        classifiers.remove("rf");
        let error =
            score_ensemble(&features(), &classifiers, &config(0.4)).expect_err("must fail");
        assert!(matches!(
            error,
            EnsembleError::ModelUnavailable(model) if model == "rf"
        ));
    }

    #[test]
    fn inference_failures_name_the_model() {
        let mut classifiers = classifiers(0.5, 0.5);
        classifiers.insert("rf".to_string(), Box::new(Broken));
        let error =
            score_ensemble(&features(), &classifiers, &config(0.4)).expect_err("must fail");
        assert!(matches!(
            error,
            EnsembleError::Inference { model, .. } if model == "rf"
        ));
    }

    #[test]
    fn tiering_matches_the_calibrated_boundaries() {
        assert_eq!(RiskTier::from_score(0.39, 0.4), RiskTier::Low);
        assert_eq!(RiskTier::from_score(0.42, 0.4), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(0.50, 0.4), RiskTier::High);
    }

    #[test]
    fn tier_boundaries_are_half_open() {
        assert_eq!(RiskTier::from_score(0.4, 0.4), RiskTier::Medium);
        let below = f64::from_bits(0.5_f64.to_bits() - 1);
        assert_eq!(RiskTier::from_score(below, 0.4), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(0.5, 0.4), RiskTier::High);
    }

    #[test]
    fn tiers_partition_the_score_space_for_any_threshold() {
        let mut threshold = 0.0;
        while threshold <= 0.9 {
            let mut score = 0.0;
            let mut previous = RiskTier::from_score(score, threshold);
            while score <= 1.0 {
                let tier = RiskTier::from_score(score, threshold);
                // Tiers only ever move Low -> Medium -> High as scores grow.
                let rank = |tier: RiskTier| match tier {
                    RiskTier::Low => 0,
                    RiskTier::Medium => 1,
                    RiskTier::High => 2,
                };
                assert!(rank(tier) >= rank(previous));
                previous = tier;
                score += 0.001;
            }
            threshold += 0.05;
        }
    }

    #[test]
    fn tier_labels_serialize_to_the_spanish_strings() {
        assert_eq!(
            serde_json::to_string(&RiskTier::Medium).expect("serializes"),
            "\"Riesgo medio\""
        );
        assert_eq!(RiskTier::High.label(), "Alto riesgo");
    }
}
