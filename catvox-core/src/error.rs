//! Error types for catvox-core organized by processing stage.

use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use thiserror::Error;

/// Pipeline error variants organized by processing stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Upload intake stage error
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Audio validation and decoding stage error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Feature computation stage error
    #[error(transparent)]
    Features(#[from] FeatureError),

    /// Model inference stage error
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl Error {
    /// Message shown to the caller in an error envelope.
    ///
    /// Details stay in the `Display` output, which is only logged.
    pub fn user_message(&self) -> String {
        match self {
            Error::Upload(UploadError::NoFile) => "No audio file provided".to_string(),
            Error::Upload(UploadError::UnsupportedFormat { .. }) => {
                "Unsupported file format. Use WAV, MP3, or WebM".to_string()
            }
            Error::Upload(UploadError::Empty) => "Audio file is empty".to_string(),
            Error::Upload(UploadError::Persist(_)) => "Failed to store audio file".to_string(),
            Error::Audio(AudioError::InvalidWav(_)) => {
                "Invalid WAV file. Record again or upload a different file".to_string()
            }
            Error::Audio(_) | Error::Features(_) => "Failed to extract audio features".to_string(),
            Error::Model(ModelError::Unavailable { .. }) => {
                "Model unavailable. Make sure the model file is in the configured location"
                    .to_string()
            }
            Error::Model(_) => "Prediction failed".to_string(),
        }
    }
}

/// Upload intake errors, raised before any audio is touched.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Missing file or empty filename
    #[error("no audio file provided")]
    NoFile,

    /// Filename extension is not one of the supported formats
    #[error("unsupported audio format: {filename}")]
    UnsupportedFormat { filename: String },

    /// Upload has zero bytes
    #[error("uploaded file is empty")]
    Empty,

    /// Writing the upload to a temporary file failed
    #[error("failed to persist upload: {0}")]
    Persist(#[source] std::io::Error),
}

/// Audio loading and validation errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Path does not exist
    #[error("audio file not found: {0}")]
    NotFound(String),

    /// File exists but has zero bytes
    #[error("audio file is empty: {0}")]
    EmptyFile(String),

    /// WAV header failed structural validation
    #[error("invalid wav file: {0}")]
    InvalidWav(String),

    /// Both decode attempts failed
    #[error("failed to decode audio: {native}; fallback at {fallback_rate}Hz: {fallback}")]
    Decode {
        native: Box<AudioError>,
        fallback: Box<AudioError>,
        fallback_rate: u32,
    },

    /// Container has no decodable audio track
    #[error("no audio track found")]
    NoTrack,

    /// Sample rate could not be determined
    #[error("unknown sample rate")]
    UnknownSampleRate,

    /// Decoding produced no samples
    #[error("decoded audio contains no samples")]
    NoSamples,

    /// ffmpeg binary could not be started
    #[error("ffmpeg is not available: {0}")]
    FfmpegUnavailable(#[source] std::io::Error),

    /// ffmpeg exited with an error
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    /// Sample rate conversion failed
    #[error("resampling failed: {0}")]
    Resample(String),

    /// IO error during audio loading
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// WAV file format error
    #[error(transparent)]
    Hound(#[from] hound::Error),

    /// Compressed container or codec error
    #[error(transparent)]
    Symphonia(#[from] symphonia::core::errors::Error),
}

/// Feature matrix errors.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Matrix does not have the fixed classifier shape
    #[error("invalid feature shape: expected {expected:?}, got {got:?}")]
    InvalidShape {
        expected: (usize, usize),
        got: (usize, usize),
    },

    /// Computed features contain NaN or infinity
    #[error("feature matrix contains non-finite values")]
    NonFinite,
}

/// Model inference errors (ONNX, ndarray operations).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Model failed to load at startup
    #[error("model unavailable: {reason}")]
    Unavailable { reason: String },

    /// Model file could not be located
    #[error("model file not found: {0}")]
    NotFound(String),

    /// HuggingFace Hub download error
    #[error(transparent)]
    Hub(#[from] hf_hub::api::sync::ApiError),

    /// Model declares no input tensor
    #[error("model has no inputs")]
    MissingInput,

    /// Missing expected output tensor
    #[error("missing model output: {name}")]
    MissingOutput { name: String },

    /// Output vector has the wrong number of classes
    #[error("unexpected output length: expected {expected}, got {got}")]
    OutputLength { expected: usize, got: usize },

    /// Predicted class index has no label
    #[error("class index {0} has no label")]
    UnknownClass(usize),

    /// Output contains NaN or infinity
    #[error("model output contains non-finite values")]
    NonFinite,

    /// ONNX Runtime error
    #[error(transparent)]
    Ort(#[from] ort::Error),

    /// ndarray shape error
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// ndarray-stats min/max error
    #[error(transparent)]
    MinMax(#[from] MinMaxError),
}

/// Result type alias for catvox-core operations.
pub type Result<T> = std::result::Result<T, Error>;
