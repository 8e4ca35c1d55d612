//! Classifier adapter around a fixed-input-shape ONNX model.

use crate::error::ModelError;
use crate::features::{FeatureMatrix, MAX_FRAMES, N_MFCC};
use crate::types::{Label, ModelRepo};
use ndarray::{Array1, ArrayView4};
use ndarray_stats::QuantileExt;
use ort::inputs;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::Tensor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default model file name inside a model repository.
pub const MODEL_FILE: &str = "cat_meow_classifier.onnx";

/// Model input shape: (batch, coefficients, frames, channel).
pub const INPUT_SHAPE: (usize, usize, usize, usize) = (1, N_MFCC, MAX_FRAMES, 1);

/// Allowed deviation of a probability vector's sum from 1.
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// A model that scores a single feature tensor.
///
/// Implementations must be safe to share across request threads.
pub trait Classifier: Send + Sync {
    /// Run one forward pass on an input of shape [`INPUT_SHAPE`].
    ///
    /// Returns one score per class, in [`Label::ALL`] order.
    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelError>;
}

/// ONNX Runtime classifier.
///
/// The session is guarded by a mutex since a forward pass needs exclusive
/// access to it.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    /// Wrap a committed session, reading its first input and output names.
    pub fn new(session: Session) -> Result<Self, ModelError> {
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or(ModelError::MissingInput)?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| ModelError::MissingOutput {
                name: "model output".to_string(),
            })?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    /// Load a model file with the given session builder.
    pub fn from_file(path: &Path, session_builder: SessionBuilder) -> Result<Self, ModelError> {
        let session = session_builder.commit_from_file(path)?;
        Self::new(session)
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelError> {
        let tensor = Tensor::from_array(input.to_owned())?;

        let mut session = lock_session(&self.session);

        let mut outputs = session.run(inputs!(self.input_name.as_str() => tensor))?;

        let output = outputs
            .remove(self.output_name.as_str())
            .ok_or_else(|| ModelError::MissingOutput {
                name: self.output_name.clone(),
            })?;

        let scores = output.try_extract_array::<f32>()?;

        Ok(scores.iter().copied().collect())
    }
}

/// Take the session lock, recovering it if a previous holder panicked.
///
/// Sessions keep no state between runs.
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loaded classifier state, fixed at startup.
enum ModelState {
    Ready(Box<dyn Classifier>),
    Unavailable { reason: String },
}

/// Converts feature matrices into classification results.
///
/// Holds either a ready classifier or the reason loading failed; in the
/// latter case every call fails immediately with
/// [`ModelError::Unavailable`].
pub struct ClassifierAdapter {
    state: ModelState,
    model_path: Option<PathBuf>,
}

impl ClassifierAdapter {
    pub fn new(classifier: impl Classifier + 'static) -> Self {
        Self {
            state: ModelState::Ready(Box::new(classifier)),
            model_path: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: ModelState::Unavailable {
                reason: reason.into(),
            },
            model_path: None,
        }
    }

    /// Load the ONNX model from a repository.
    ///
    /// Never fails: a missing or broken model yields an unavailable adapter
    /// so the rest of the system keeps running.
    pub fn load(repo: &ModelRepo, file_name: &str, session_builder: SessionBuilder) -> Self {
        let path = match repo.resolve(file_name) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, file_name, "model file not found");
                return Self::unavailable(e.to_string());
            }
        };

        tracing::info!(path = %path.display(), "loading model");

        let adapter = match OnnxClassifier::from_file(&path, session_builder) {
            Ok(classifier) => {
                tracing::info!(
                    input = %classifier.input_name,
                    output = %classifier.output_name,
                    "model loaded"
                );
                Self::new(classifier)
            }
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to load model");
                Self::unavailable(e.to_string())
            }
        };

        adapter.with_model_path(path)
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    /// Classify one feature matrix.
    ///
    /// The matrix is reshaped to [`INPUT_SHAPE`] without any scaling.
    pub fn classify(&self, features: &FeatureMatrix) -> Result<ClassificationResult, ModelError> {
        let classifier = match &self.state {
            ModelState::Ready(classifier) => classifier,
            ModelState::Unavailable { reason } => {
                return Err(ModelError::Unavailable {
                    reason: reason.clone(),
                });
            }
        };

        let view = features.view();
        let input = view.into_shape_with_order(INPUT_SHAPE)?;

        tracing::debug!(shape = ?input.dim(), "classifier input");

        let scores = classifier.predict(input)?;
        let result = ClassificationResult::from_scores(&scores)?;

        tracing::info!(
            label = %result.label,
            confidence = format!("{:.4}", result.confidence),
            "prediction"
        );

        Ok(result)
    }
}

/// Label, confidence and the full class distribution of one prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub label: Label,
    pub class_index: usize,
    /// Highest class probability, in [0, 1].
    pub confidence: f32,
    /// Probability per class in [`Label::ALL`] order, summing to 1.
    pub probabilities: [f32; Label::COUNT],
}

impl ClassificationResult {
    /// Build a result from raw model scores.
    ///
    /// Scores that are not already a probability distribution are passed
    /// through a softmax first.
    pub fn from_scores(scores: &[f32]) -> Result<Self, ModelError> {
        let mut probabilities: [f32; Label::COUNT] =
            scores
                .try_into()
                .map_err(|_| ModelError::OutputLength {
                    expected: Label::COUNT,
                    got: scores.len(),
                })?;

        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite);
        }

        if !is_distribution(&probabilities) {
            tracing::debug!("model output is not a distribution, applying softmax");
            softmax(&mut probabilities);
        }

        let class_index = Array1::from(probabilities.to_vec()).argmax()?;
        let label = Label::from_index(class_index).ok_or(ModelError::UnknownClass(class_index))?;

        Ok(Self {
            label,
            class_index,
            confidence: probabilities[class_index],
            probabilities,
        })
    }

    pub fn probability(&self, label: Label) -> f32 {
        self.probabilities[label.index()]
    }

    /// Probabilities keyed by lower-cased label name.
    pub fn probability_map(&self) -> BTreeMap<String, f32> {
        Label::ALL
            .iter()
            .map(|label| (label.name().to_lowercase(), self.probability(*label)))
            .collect()
    }
}

fn is_distribution(values: &[f32]) -> bool {
    let sum: f32 = values.iter().sum();
    values.iter().all(|p| (0.0..=1.0).contains(p)) && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE
}

fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}
