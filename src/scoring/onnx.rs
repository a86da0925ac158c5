use std::path::Path;
use std::sync::Mutex;

use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use tracing::info;

use super::ensemble::{Classifier, PredictError};

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to initialize the ONNX runtime: {0}")]
    Runtime(#[source] ort::Error),
    #[error("failed to load classifier artifact {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: ort::Error,
    },
}

/// Registers the process-wide ONNX runtime. Call once before loading any
/// classifier artifact.
pub fn init_runtime() -> Result<(), ModelLoadError> {
    ort::init().commit().map_err(ModelLoadError::Runtime)?;
    Ok(())
}

/// Ensemble member backed by a persisted ONNX export of a trained binary
/// classifier. The session is behind a mutex because inference takes the
/// session mutably; scoring is sequential so there is no contention.
#[derive(Debug)]
pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxClassifier {
    pub fn from_file(path: &Path, name: &str) -> Result<Self, ModelLoadError> {
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.with_intra_threads(1))
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|source| ModelLoadError::Artifact {
                path: path.display().to_string(),
                source,
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        info!(model = %name, path = %path.display(), "classifier artifact loaded");

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Classifier for OnnxClassifier {
    fn predict_probability(&self, features: &[f64]) -> Result<f64, PredictError> {
        let inputs: Vec<f32> = features.iter().map(|&value| value as f32).collect();
        let shape = vec![1_i64, inputs.len() as i64];
        let tensor = Tensor::from_array((shape, inputs))
            .map_err(|err| PredictError(format!("building input tensor: {err}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PredictError("classifier session mutex poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|err| PredictError(format!("inference failed: {err}")))?;

        positive_class_probability(&outputs).ok_or_else(|| {
            PredictError(format!(
                "no probability output found in '{}' results",
                self.name
            ))
        })
    }
}

/// Probability of class 1 from whatever output format the export produced.
/// Tree and linear exports emit a `[1, n_classes]` float tensor; zipmap-style
/// exports emit seq(map(int64, float)).
fn positive_class_probability(outputs: &SessionOutputs) -> Option<f64> {
    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            if let Some(probability) = positive_from_tensor(&dims, data) {
                return Some(probability);
            }
        }
        if let Some(probability) = positive_from_class_map(&output) {
            return Some(probability);
        }
    }
    None
}

fn positive_from_tensor(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = match dims {
        [_, classes] => *classes as usize,
        [classes] => *classes as usize,
        _ => return None,
    };
    match classes {
        0 => None,
        1 => data.first().map(|&value| f64::from(value)),
        _ => data.get(1).map(|&value| f64::from(value)),
    }
}

fn positive_from_class_map(output: &DynValue) -> Option<f64> {
    let allocator = Allocator::default();
    let sequence = output.downcast_ref::<DynSequenceValueType>().ok()?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .ok()?;
    let class_probabilities = maps.first()?.try_extract_key_values::<i64, f32>().ok()?;

    for (class, probability) in &class_probabilities {
        if *class == 1 {
            return Some(f64::from(*probability));
        }
    }
    class_probabilities
        .iter()
        .find(|(class, _)| *class == 0)
        .map(|(_, probability)| 1.0 - f64::from(*probability))
}
