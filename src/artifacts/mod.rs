//! Loading of the persisted artifact set: the field schema, the ensemble
//! configuration, the trained feature-column order, and one ONNX classifier
//! per configured model id. Loaded once per process and shared read-only.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::scoring::schema::SchemaRegistry;
use crate::scoring::{
    init_runtime, Classifier, ClaimScorer, EnsembleConfig, ModelLoadError, OnnxClassifier,
};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Model(#[from] ModelLoadError),
}

/// The full artifact set for one deployment of the scoring service.
pub struct ArtifactStore {
    pub schema: SchemaRegistry,
    pub ensemble: EnsembleConfig,
    pub feature_columns: Vec<String>,
    pub classifiers: BTreeMap<String, Box<dyn Classifier>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("schema", &self.schema)
            .field("ensemble", &self.ensemble)
            .field("feature_columns", &self.feature_columns)
            .field(
                "classifiers",
                &self.classifiers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ArtifactStore {
    /// Loads every artifact from `dir`. Loading is strict: each model id
    /// named in the ensemble weights must yield a working classifier,
    /// because scoring fails anyway the moment a configured member is
    /// absent.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let schema: SchemaRegistry = read_json(&dir.join("io_schema.json"))?;
        let ensemble: EnsembleConfig = read_json(&dir.join("ensemble_config.json"))?;
        let feature_columns: Vec<String> = read_json(&dir.join("feature_cols.json"))?;

        init_runtime()?;
        let mut classifiers: BTreeMap<String, Box<dyn Classifier>> = BTreeMap::new();
        for model_id in ensemble.weights.keys() {
            let path = dir.join(format!("model_{model_id}.onnx"));
            let classifier = OnnxClassifier::from_file(&path, model_id)?;
            classifiers.insert(model_id.clone(), Box::new(classifier));
        }

        info!(
            dir = %dir.display(),
            fields = schema.len(),
            features = feature_columns.len(),
            models = classifiers.len(),
            threshold = ensemble.threshold,
            "scoring artifacts loaded"
        );

        Ok(Self {
            schema,
            ensemble,
            feature_columns,
            classifiers,
        })
    }

    pub fn into_scorer(self) -> ClaimScorer {
        ClaimScorer::new(
            self.schema,
            self.feature_columns,
            self.classifiers,
            self.ensemble,
        )
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ArtifactError::Parse {
        path: path.display().to_string(),
        source,
    })
}
