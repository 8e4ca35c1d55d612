//! Request orchestration: one upload in, one [`ResponseEnvelope`] out.

use crate::caption::{CaptionGenerator, CaptionSource};
use crate::classifier::{ClassificationResult, ClassifierAdapter, INPUT_SHAPE};
use crate::error::{Error, ModelError, Result, UploadError};
use crate::features::FeatureExtractor;
use crate::types::{AudioFormat, AudioUpload};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Message returned when processing panics.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Successful classification of one upload.
#[derive(Clone, Debug, Serialize)]
pub struct Prediction {
    pub result: String,
    pub confidence: f32,
    pub predicted_class: usize,
    pub all_probabilities: BTreeMap<String, f32>,
    pub timestamp: String,
    pub audio_format: String,
    pub processed_shape: String,
    pub processing_method: String,
    pub ai_phrase: String,
    pub caption_source: CaptionSource,
}

/// The single response produced per request.
///
/// Serializes either as the flat prediction object or as `{"error": ...}`.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success(Box<Prediction>),
    Error { error: String },
}

impl ResponseEnvelope {
    pub fn error(message: impl Into<String>) -> Self {
        ResponseEnvelope::Error {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success(_))
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            ResponseEnvelope::Success(prediction) => Some(prediction),
            ResponseEnvelope::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Success(_) => None,
            ResponseEnvelope::Error { error } => Some(error),
        }
    }
}

/// Runs uploads through validation, feature extraction, classification and
/// captioning.
///
/// Holds only read-only state, so one instance serves concurrent requests.
pub struct Pipeline {
    extractor: FeatureExtractor,
    classifier: ClassifierAdapter,
    captions: CaptionGenerator,
    temp_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(classifier: ClassifierAdapter, captions: CaptionGenerator) -> Self {
        Self {
            extractor: FeatureExtractor::default(),
            classifier,
            captions,
            temp_dir: None,
        }
    }

    /// Directory for upload temp files. Defaults to the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn classifier(&self) -> &ClassifierAdapter {
        &self.classifier
    }

    pub fn captions(&self) -> &CaptionGenerator {
        &self.captions
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Process one upload.
    ///
    /// Never panics and never returns a partial result: every failure,
    /// including a panic in a processing stage, becomes an error envelope.
    pub fn handle(&self, upload: &AudioUpload) -> ResponseEnvelope {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(upload))) {
            Ok(Ok(prediction)) => ResponseEnvelope::Success(Box::new(prediction)),
            Ok(Err(e)) => {
                tracing::error!(filename = %upload.filename, error = %e, "request failed");
                ResponseEnvelope::error(e.user_message())
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(filename = %upload.filename, reason = %reason, "request panicked");
                ResponseEnvelope::error(INTERNAL_ERROR_MESSAGE)
            }
        }
    }

    /// Process one upload, returning the stage error on failure.
    pub fn process(&self, upload: &AudioUpload) -> Result<Prediction> {
        if upload.filename.is_empty() {
            return Err(UploadError::NoFile.into());
        }

        let format = AudioFormat::from_filename(&upload.filename).ok_or_else(|| {
            UploadError::UnsupportedFormat {
                filename: upload.filename.clone(),
            }
        })?;

        if upload.bytes.is_empty() {
            return Err(UploadError::Empty.into());
        }

        if !self.classifier.is_loaded() {
            return Err(Error::Model(ModelError::Unavailable {
                reason: "model not loaded at startup".to_string(),
            }));
        }

        let temp_path = self.persist(upload, format)?;

        let result = self.classify_file(&temp_path, format);

        cleanup(temp_path);

        let (classification, method) = result?;

        let caption = self.captions.caption(classification.label.name());
        tracing::info!(phrase = %caption.text, source = ?caption.source, "caption");

        Ok(Prediction {
            result: classification.label.name().to_string(),
            confidence: classification.confidence,
            predicted_class: classification.class_index,
            all_probabilities: classification.probability_map(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            audio_format: format.suffix().to_string(),
            processed_shape: shape_string(INPUT_SHAPE),
            processing_method: method,
            ai_phrase: caption.text,
            caption_source: caption.source,
        })
    }

    /// Write the upload to a uniquely named temp file.
    fn persist(&self, upload: &AudioUpload, format: AudioFormat) -> Result<TempPath> {
        let prefix = format!(
            "audio_{}_{}_",
            chrono::Utc::now().timestamp(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(format.suffix())
            .tempfile_in(self.temp_dir())
            .map_err(UploadError::Persist)?;

        file.write_all(&upload.bytes)
            .and_then(|()| file.flush())
            .map_err(UploadError::Persist)?;

        let path = file.into_temp_path();

        tracing::info!(
            path = %path.display(),
            size = upload.bytes.len(),
            "audio persisted"
        );

        Ok(path)
    }

    fn classify_file(
        &self,
        path: &Path,
        format: AudioFormat,
    ) -> Result<(ClassificationResult, String)> {
        tracing::info!(format = format.suffix(), "processing upload");

        let features = self.extractor.extract(path, format)?;
        let classification = self.classifier.classify(&features)?;

        Ok((classification, format!("direct_{}", format.suffix())))
    }
}

/// Delete a temp file, logging rather than propagating failures.
fn cleanup(path: TempPath) {
    let path_str = path.display().to_string();
    match path.close() {
        Ok(()) => tracing::debug!(path = %path_str, "temp file removed"),
        Err(e) => tracing::error!(path = %path_str, error = %e, "failed to remove temp file"),
    }
}

/// Tuple-style shape string, e.g. `(1, 40, 130, 1)`.
pub fn shape_string(shape: (usize, usize, usize, usize)) -> String {
    format!("({}, {}, {}, {})", shape.0, shape.1, shape.2, shape.3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::{create_test_wav, tone};
    use crate::caption::{TextGenerationError, TextGenerator};
    use crate::classifier::Classifier;
    use crate::types::Label;
    use ndarray::ArrayView4;
    use tempfile::TempDir;

    struct Peaked(Label);

    impl Classifier for Peaked {
        fn predict(&self, _input: ArrayView4<'_, f32>) -> std::result::Result<Vec<f32>, ModelError> {
            let mut scores = vec![0.0; Label::COUNT];
            scores[self.0.index()] = 1.0;
            Ok(scores)
        }
    }

    struct Panicking;

    impl Classifier for Panicking {
        fn predict(&self, _input: ArrayView4<'_, f32>) -> std::result::Result<Vec<f32>, ModelError> {
            panic!("inference blew up");
        }
    }

    struct Quiet;

    impl TextGenerator for Quiet {
        fn generate(&self, _prompt: &str) -> std::result::Result<String, TextGenerationError> {
            Ok("Snack time, human! 🐟".to_string())
        }
    }

    fn pipeline(classifier: ClassifierAdapter, dir: &TempDir) -> Pipeline {
        Pipeline::new(classifier, CaptionGenerator::fallback_only()).with_temp_dir(dir.path())
    }

    fn wav_bytes(dir: &TempDir) -> Vec<u8> {
        let path = dir.path().join("source.wav");
        create_test_wav(&path, 22_050, 1, &tone(600.0, 22_050, 1.0, 0.5)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        bytes
    }

    fn temp_files(dir: &TempDir) -> Vec<PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[test]
    fn successful_request_fills_envelope() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            ClassifierAdapter::new(Peaked(Label::WaitingFood)),
            CaptionGenerator::new(Quiet),
        )
        .with_temp_dir(dir.path());

        let upload = AudioUpload::new("Meow.WAV", wav_bytes(&dir));
        let envelope = pipeline.handle(&upload);

        let prediction = envelope.prediction().unwrap();
        assert_eq!(prediction.result, "Waiting_food");
        assert_eq!(prediction.predicted_class, 11);
        assert_eq!(prediction.confidence, 1.0);
        assert_eq!(prediction.all_probabilities.len(), Label::COUNT);
        assert_eq!(prediction.all_probabilities["waiting_food"], 1.0);
        assert_eq!(prediction.audio_format, ".wav");
        assert_eq!(prediction.processed_shape, "(1, 40, 130, 1)");
        assert_eq!(prediction.processing_method, "direct_.wav");
        assert_eq!(prediction.ai_phrase, "Snack time, human! 🐟");
        assert_eq!(prediction.caption_source, CaptionSource::Generated);
        assert_eq!(prediction.timestamp.len(), "2024-01-01 00:00:00".len());

        assert!(temp_files(&dir).is_empty());
    }

    #[test]
    fn success_serializes_flat() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::new(Peaked(Label::Happy)), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("a.wav", wav_bytes(&dir)));
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["result"], "Happy");
        assert_eq!(json["caption_source"], "fallback");
        assert!(json.get("error").is_none());
        assert!(json["all_probabilities"]["huntingmind"].is_number());
    }

    #[test]
    fn error_serializes_as_error_only() {
        let json = serde_json::to_value(ResponseEnvelope::error("Audio file is empty")).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Audio file is empty"}));
    }

    #[test]
    fn missing_filename_is_rejected() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::new(Peaked(Label::Happy)), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("", vec![1, 2, 3]));
        assert_eq!(envelope.error_message(), Some("No audio file provided"));
    }

    #[test]
    fn unsupported_format_creates_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::new(Peaked(Label::Happy)), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("notes.txt", b"hello".to_vec()));

        assert_eq!(
            envelope.error_message(),
            Some("Unsupported file format. Use WAV, MP3, or WebM")
        );
        assert!(temp_files(&dir).is_empty());
    }

    #[test]
    fn empty_upload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::new(Peaked(Label::Happy)), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("meow.wav", Vec::new()));

        assert_eq!(envelope.error_message(), Some("Audio file is empty"));
        assert!(temp_files(&dir).is_empty());
    }

    #[test]
    fn unavailable_model_fails_every_request() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::unavailable("no model"), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("meow.wav", wav_bytes(&dir)));

        assert!(
            envelope
                .error_message()
                .is_some_and(|m| m.starts_with("Model unavailable"))
        );
        assert!(temp_files(&dir).is_empty());
    }

    #[test]
    fn malformed_wav_is_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::new(Peaked(Label::Happy)), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("meow.wav", b"RIFF garbage".to_vec()));

        assert_eq!(
            envelope.error_message(),
            Some("Invalid WAV file. Record again or upload a different file")
        );
        assert!(temp_files(&dir).is_empty());
    }

    #[test]
    fn panic_becomes_generic_error_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(ClassifierAdapter::new(Panicking), &dir);

        let envelope = pipeline.handle(&AudioUpload::new("meow.wav", wav_bytes(&dir)));

        assert_eq!(envelope.error_message(), Some(INTERNAL_ERROR_MESSAGE));
        assert!(temp_files(&dir).is_empty());
    }

    #[test]
    fn shape_string_matches_tuple_format() {
        assert_eq!(shape_string(INPUT_SHAPE), "(1, 40, 130, 1)");
    }
}
