//! Core types for catvox-core

use crate::error::ModelError;
use hf_hub::CacheRepo;
use hf_hub::api::sync::ApiRepo;
use std::fmt;
use std::path::PathBuf;

/// Classification outcome of a cat vocalization.
///
/// Variant order matches the classifier's output indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Angry,
    Brushing,
    Defense,
    Fighting,
    Happy,
    HuntingMind,
    Isolation,
    Mating,
    MotherCall,
    Paining,
    Resting,
    WaitingFood,
    Warning,
}

impl Label {
    /// Number of classes the model predicts.
    pub const COUNT: usize = 13;

    /// All labels in model output order.
    pub const ALL: [Label; Self::COUNT] = [
        Label::Angry,
        Label::Brushing,
        Label::Defense,
        Label::Fighting,
        Label::Happy,
        Label::HuntingMind,
        Label::Isolation,
        Label::Mating,
        Label::MotherCall,
        Label::Paining,
        Label::Resting,
        Label::WaitingFood,
        Label::Warning,
    ];

    /// Label for a model output index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Model output index of this label.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Name as reported to callers.
    pub fn name(self) -> &'static str {
        match self {
            Label::Angry => "Angry",
            Label::Brushing => "Brushing",
            Label::Defense => "Defense",
            Label::Fighting => "Fighting",
            Label::Happy => "Happy",
            Label::HuntingMind => "HuntingMind",
            Label::Isolation => "Isolation",
            Label::Mating => "Mating",
            Label::MotherCall => "MotherCall",
            Label::Paining => "Paining",
            Label::Resting => "Resting",
            Label::WaitingFood => "Waiting_food",
            Label::Warning => "Warning",
        }
    }

    /// Parse a label name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|label| label.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Supported upload container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Webm,
}

impl AudioFormat {
    /// All supported formats.
    pub const ALL: [AudioFormat; 3] = [AudioFormat::Wav, AudioFormat::Mp3, AudioFormat::Webm];

    /// Detect the format from a filename suffix, ignoring case.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| lower.ends_with(format.suffix()))
    }

    /// File suffix including the leading dot.
    pub fn suffix(self) -> &'static str {
        match self {
            AudioFormat::Wav => ".wav",
            AudioFormat::Mp3 => ".mp3",
            AudioFormat::Webm => ".webm",
        }
    }

    /// Extension without the dot, as used for decoder hints.
    pub fn extension(self) -> &'static str {
        &self.suffix()[1..]
    }
}

/// Raw uploaded audio: bytes plus the filename the client declared.
#[derive(Clone, Debug)]
pub struct AudioUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Model repository sources.
#[derive(Debug)]
pub enum ModelRepo {
    /// Local filesystem directory
    Path(PathBuf),
    /// HuggingFace cache repository
    Cache(CacheRepo),
    /// HuggingFace API repository
    Api(ApiRepo),
}

impl ModelRepo {
    /// Resolve a file name to its full path in this repository.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, ModelError> {
        match self {
            ModelRepo::Path(path) => {
                let candidate = path.join(file_name);
                if candidate.is_file() {
                    Ok(candidate)
                } else {
                    Err(ModelError::NotFound(candidate.display().to_string()))
                }
            }
            ModelRepo::Cache(cache_repo) => cache_repo
                .get(file_name)
                .ok_or_else(|| ModelError::NotFound(format!("{file_name} (hub cache)"))),
            ModelRepo::Api(api_repo) => Ok(api_repo.get(file_name)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_matches_model_indices() {
        assert_eq!(Label::from_index(0), Some(Label::Angry));
        assert_eq!(Label::from_index(5), Some(Label::HuntingMind));
        assert_eq!(Label::from_index(11), Some(Label::WaitingFood));
        assert_eq!(Label::from_index(12), Some(Label::Warning));
        assert_eq!(Label::from_index(13), None);

        for (i, label) in Label::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
        }
    }

    #[test]
    fn label_names_round_trip() {
        assert_eq!(Label::WaitingFood.name(), "Waiting_food");
        assert_eq!(Label::from_name("waiting_food"), Some(Label::WaitingFood));
        assert_eq!(Label::from_name("MOTHERCALL"), Some(Label::MotherCall));
        assert_eq!(Label::from_name("Purring"), None);
    }

    #[test]
    fn detects_format_case_insensitively() {
        assert_eq!(AudioFormat::from_filename("meow.WAV"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::from_filename("rec.webm"), Some(AudioFormat::Webm));
        assert_eq!(AudioFormat::from_filename("a.b.Mp3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::from_filename("notes.txt"), None);
        assert_eq!(AudioFormat::from_filename("wav"), None);
        assert_eq!(AudioFormat::from_filename(""), None);
    }

    #[test]
    fn path_repo_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::Path(dir.path().to_path_buf());

        assert!(matches!(
            repo.resolve("missing.onnx"),
            Err(ModelError::NotFound(_))
        ));

        std::fs::write(dir.path().join("model.onnx"), b"onnx").unwrap();
        assert_eq!(
            repo.resolve("model.onnx").unwrap(),
            dir.path().join("model.onnx")
        );
    }
}
