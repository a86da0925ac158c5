//! The claim-scoring pipeline: schema-driven feature normalization, weighted
//! ensemble scoring, and rule-based recommendations.

mod buckets;
mod ensemble;
mod normalizer;
mod onnx;
mod recommend;
pub mod schema;

pub use ensemble::{score_ensemble, Classifier, EnsembleConfig, EnsembleError, PredictError, RiskTier};
pub use normalizer::{
    normalize, parse_claim_date, NormalizeError, NormalizedClaim, RawClaimRecord, RawValue,
};
pub use onnx::{init_runtime, ModelLoadError, OnnxClassifier};
pub use recommend::recommend;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use schema::SchemaRegistry;

/// Final verdict for one claim. Created once, read many times, and persisted
/// verbatim into the analysis history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredClaim {
    pub score: f64,
    pub riesgo: RiskTier,
    pub recomendaciones: Vec<String>,
}

/// A scored claim together with the feature vector that produced it.
#[derive(Debug, Clone)]
pub struct ClaimAssessment {
    pub features: NormalizedClaim,
    pub claim: ScoredClaim,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
}

/// Owns the loaded artifacts and runs the full pipeline for one claim at a
/// time. Everything inside is read-only after construction, so a shared
/// reference can serve concurrent requests.
pub struct ClaimScorer {
    schema: SchemaRegistry,
    feature_columns: Vec<String>,
    classifiers: BTreeMap<String, Box<dyn Classifier>>,
    ensemble: EnsembleConfig,
}

impl ClaimScorer {
    pub fn new(
        schema: SchemaRegistry,
        feature_columns: Vec<String>,
        classifiers: BTreeMap<String, Box<dyn Classifier>>,
        ensemble: EnsembleConfig,
    ) -> Self {
        Self {
            schema,
            feature_columns,
            classifiers,
            ensemble,
        }
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Normalization or scoring failures abort the whole request; there is
    /// no partial score.
    pub fn analyze(&self, record: &RawClaimRecord) -> Result<ClaimAssessment, ScoringError> {
        let features = normalize(record, &self.schema, &self.feature_columns)?;
        let (score, tier) = score_ensemble(&features, &self.classifiers, &self.ensemble)?;
        let recomendaciones = recommend(&features);

        info!(score, tier = tier.label(), "claim scored");

        Ok(ClaimAssessment {
            features,
            claim: ScoredClaim {
                score,
                riesgo: tier,
                recomendaciones,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbability(f64);

    impl Classifier for FixedProbability {
        fn predict_probability(&self, _features: &[f64]) -> Result<f64, PredictError> {
            Ok(self.0)
        }
    }

    fn scorer(probability: f64, threshold: f64) -> ClaimScorer {
        let schema: SchemaRegistry = serde_json::from_str(
            r#"{
                "EDAD DEL ASEGURADO": {"type": "numeric", "original": "AgeOfPolicyHolder"},
                "NUMERO DE RECLAMACIONES PASADAS": {
                    "type": "numeric", "original": "PastNumberOfClaims"
                }
            }"#,
        )
        .expect("schema parses");

        let mut classifiers: BTreeMap<String, Box<dyn Classifier>> = BTreeMap::new();
        classifiers.insert("logreg".to_string(), Box::new(FixedProbability(probability)));

        let mut weights = BTreeMap::new();
        weights.insert("logreg".to_string(), 1.0);

        ClaimScorer::new(
            schema,
            vec![
                "AgeOfPolicyHolder".to_string(),
                "PastNumberOfClaims".to_string(),
            ],
            classifiers,
            EnsembleConfig { weights, threshold },
        )
    }

    fn record() -> RawClaimRecord {
        let mut record = RawClaimRecord::new();
        record.insert("EDAD DEL ASEGURADO", RawValue::Number(29.0));
        record.insert("NUMERO DE RECLAMACIONES PASADAS", RawValue::Number(8.0));
        record
    }

    #[test]
    fn analyze_composes_normalization_scoring_and_advice() {
        let assessment = scorer(0.42, 0.4).analyze(&record()).expect("analyzes");

        assert_eq!(assessment.features.len(), 2);
        assert_eq!(assessment.features.get("AgeOfPolicyHolder"), Some(28.0));
        assert_eq!(assessment.claim.riesgo, RiskTier::Medium);
        assert!((assessment.claim.score - 0.42).abs() < 1e-12);
        assert!(assessment
            .claim
            .recomendaciones
            .iter()
            .any(|entry| entry.contains("Historial de reclamos elevado")));
    }

    #[test]
    fn normalization_failures_abort_without_a_partial_score() {
        let mut record = record();
        record.0.remove("EDAD DEL ASEGURADO");
        let error = scorer(0.42, 0.4).analyze(&record).expect_err("must fail");
        assert!(matches!(error, ScoringError::Normalize(_)));
    }

    #[test]
    fn scored_claim_serializes_with_the_history_field_names() {
        let assessment = scorer(0.9, 0.4).analyze(&record()).expect("analyzes");
        let json = serde_json::to_value(&assessment.claim).expect("serializes");
        assert_eq!(json["riesgo"], "Alto riesgo");
        assert!(json["score"].is_number());
        assert!(json["recomendaciones"].is_array());
    }
}
