//! Configuration types for resolved CLI arguments.
//!
//! Each Config is converted from its Args struct via TryFrom. Args structs
//! (for CLI parsing) remain in cli.rs.

use crate::cli::{CaptionArgs, ModelArgs, ModelSource, PipelineArgs};
use catvox_core::caption::{CaptionGenerator, GeminiClient};
use catvox_core::classifier::ClassifierAdapter;
use catvox_core::pipeline::Pipeline;
use catvox_core::types::ModelRepo;
use eyre::{Context, Result};
use hf_hub::Cache;
use hf_hub::api::sync::Api;
#[allow(unused_imports)]
use ort::execution_providers::*;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use std::path::PathBuf;
use std::time::Duration;

/// Resolved model configuration.
///
/// Contains the ModelRepo enum ready for use.
#[derive(Debug)]
pub struct ModelConfig {
    pub repo: ModelRepo,
    pub file_name: String,
}

impl TryFrom<ModelArgs> for ModelConfig {
    type Error = eyre::Error;

    fn try_from(args: ModelArgs) -> Result<Self> {
        let repo = match args.model_source {
            ModelSource::Auto => {
                let path = PathBuf::from(&args.model_id);
                if path.is_dir() || !looks_like_repo_id(&args.model_id) {
                    ModelRepo::Path(path)
                } else {
                    let api = Api::new()?;
                    ModelRepo::Api(api.model(args.model_id))
                }
            }
            ModelSource::Path => ModelRepo::Path(PathBuf::from(args.model_id)),
            ModelSource::Cache => ModelRepo::Cache(Cache::from_env().model(args.model_id)),
            ModelSource::Api => ModelRepo::Api(Api::new()?.model(args.model_id)),
        };

        Ok(Self {
            repo,
            file_name: args.model_file,
        })
    }
}

/// `owner/name` with no other path components.
fn looks_like_repo_id(id: &str) -> bool {
    let mut parts = id.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None)
            if !owner.is_empty() && !name.is_empty() && !owner.starts_with('.')
    )
}

/// Resolved caption service configuration.
#[derive(Debug)]
pub struct CaptionConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl TryFrom<CaptionArgs> for CaptionConfig {
    type Error = eyre::Error;

    fn try_from(args: CaptionArgs) -> Result<Self> {
        if args.caption_timeout == 0 {
            eyre::bail!("--caption-timeout must be at least 1 second");
        }

        Ok(Self {
            api_key: args
                .gemini_api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            model: args.gemini_model,
            timeout: Duration::from_secs(args.caption_timeout),
        })
    }
}

impl CaptionConfig {
    /// Build the caption generator.
    ///
    /// Falls back to the static table when no key is set or the client
    /// cannot be built.
    pub fn build(self) -> CaptionGenerator {
        let Some(api_key) = self.api_key else {
            tracing::warn!("GEMINI_API_KEY not set, using fallback captions");
            return CaptionGenerator::fallback_only();
        };

        match GeminiClient::new(api_key, self.model, self.timeout) {
            Ok(client) => {
                tracing::info!(model = client.model(), "caption service initialized");
                CaptionGenerator::new(client)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize caption service");
                CaptionGenerator::fallback_only()
            }
        }
    }
}

/// Resolved configuration shared by every command that runs the pipeline.
#[derive(Debug)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub caption: CaptionConfig,
    pub temp_dir: Option<PathBuf>,
}

impl TryFrom<PipelineArgs> for PipelineConfig {
    type Error = eyre::Error;

    fn try_from(args: PipelineArgs) -> Result<Self> {
        if let Some(dir) = &args.temp_dir
            && !dir.is_dir()
        {
            eyre::bail!("temp dir does not exist: {:?}", dir.display());
        }

        Ok(Self {
            model: args.model.try_into()?,
            caption: args.caption.try_into()?,
            temp_dir: args.temp_dir,
        })
    }
}

impl PipelineConfig {
    /// Load the model and caption service, then assemble the pipeline.
    ///
    /// A model that fails to load leaves the pipeline in degraded mode
    /// rather than failing startup.
    pub fn build(self) -> Result<Pipeline> {
        let builder = session_builder().wrap_err("failed to configure onnx runtime")?;
        let classifier = ClassifierAdapter::load(&self.model.repo, &self.model.file_name, builder);

        if !classifier.is_loaded() {
            tracing::warn!("model not loaded, predictions will fail until restart");
        }

        let mut pipeline = Pipeline::new(classifier, self.caption.build());
        if let Some(dir) = self.temp_dir {
            pipeline = pipeline.with_temp_dir(dir);
        }

        tracing::debug!(temp_dir = ?pipeline.temp_dir().display(), "pipeline ready");

        Ok(pipeline)
    }
}

/// Build a session builder with execution providers configured by Cargo features.
///
/// Execution providers are tried in priority order. The first available
/// provider is used; CPU is always available as fallback.
///
/// # Execution Providers
///
/// Enabled via Cargo features:
/// - `cuda` - NVIDIA CUDA
/// - `tensorrt` - NVIDIA TensorRT
/// - `openvino` - Intel OpenVINO
/// - `directml` - DirectML (Windows)
/// - `coreml` - CoreML (macOS)
pub fn session_builder() -> Result<SessionBuilder> {
    let builder = Session::builder()?.with_execution_providers([
        #[cfg(feature = "cuda")]
        CUDAExecutionProvider::default().build(),
        #[cfg(feature = "tensorrt")]
        TensorRTExecutionProvider::default().build(),
        #[cfg(feature = "openvino")]
        OpenVINOExecutionProvider::default()
            .with_cache_dir(".cache/ort")
            .build(),
        #[cfg(feature = "directml")]
        DirectMLExecutionProvider::default().build(),
        #[cfg(feature = "coreml")]
        CoreMLExecutionProvider::default().build(),
    ])?;

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn model_args(id: &str, source: ModelSource) -> ModelArgs {
        ModelArgs {
            model_id: id.to_string(),
            model_file: "cat_meow_classifier.onnx".to_string(),
            model_source: source,
        }
    }

    #[test]
    fn auto_source_prefers_local_paths() {
        let config = ModelConfig::try_from(model_args("model", ModelSource::Auto)).unwrap();
        assert!(matches!(config.repo, ModelRepo::Path(ref p) if p == Path::new("model")));

        let config = ModelConfig::try_from(model_args("./weights/cat", ModelSource::Auto)).unwrap();
        assert!(matches!(config.repo, ModelRepo::Path(_)));
    }

    #[test]
    fn repo_id_detection() {
        assert!(looks_like_repo_id("catvox/meow-classifier"));
        assert!(!looks_like_repo_id("model"));
        assert!(!looks_like_repo_id("/abs/path"));
        assert!(!looks_like_repo_id("a/b/c"));
        assert!(!looks_like_repo_id("./model"));
    }

    #[test]
    fn blank_api_key_disables_generator() {
        let config = CaptionConfig::try_from(CaptionArgs {
            gemini_api_key: Some("   ".to_string()),
            gemini_model: "gemini-2.5-flash".to_string(),
            caption_timeout: 10,
        })
        .unwrap();

        assert!(config.api_key.is_none());
        assert!(!config.build().has_generator());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = CaptionConfig::try_from(CaptionArgs {
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            caption_timeout: 0,
        });
        assert!(result.is_err());
    }

    #[test]
    fn missing_temp_dir_is_rejected() {
        let args = PipelineArgs {
            model: model_args("model", ModelSource::Path),
            caption: CaptionArgs {
                gemini_api_key: None,
                gemini_model: "gemini-2.5-flash".to_string(),
                caption_timeout: 10,
            },
            temp_dir: Some(PathBuf::from("/definitely/not/here")),
        };

        assert!(PipelineConfig::try_from(args).is_err());
    }
}
