//! CLI argument definitions using clap.

use catvox_core::caption::DEFAULT_GEMINI_MODEL;
use catvox_core::classifier::MODEL_FILE;
use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "catvox")]
#[command(about = "Translate cat meows into labels and captions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the upload form and JSON prediction endpoints
    Serve(crate::serve::Args),

    /// Classify one audio file and print the response as JSON
    Classify(crate::classify::Args),
}

/// Where the classifier model comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ModelSource {
    /// Local directory if it exists, Hugging Face repository otherwise
    #[default]
    Auto,
    /// Local directory
    Path,
    /// Hugging Face cache only
    Cache,
    /// Hugging Face Hub download
    Api,
}

/// Classifier model arguments.
#[derive(clap::Args, Clone, Debug)]
pub struct ModelArgs {
    /// Model directory or Hugging Face repository id
    #[arg(long = "model", env = "CATVOX_MODEL", default_value = "model")]
    pub model_id: String,

    /// Model file name inside the directory or repository
    #[arg(long, default_value = MODEL_FILE)]
    pub model_file: String,

    /// How to interpret --model
    #[arg(long, value_enum, default_value_t)]
    pub model_source: ModelSource,
}

/// Caption service arguments.
#[derive(clap::Args, Clone, Debug)]
pub struct CaptionArgs {
    /// Gemini API key; captions come from the fallback table when unset
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    /// Caption request timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub caption_timeout: u64,
}

/// Arguments shared by every command that runs the pipeline.
#[derive(clap::Args, Clone, Debug)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub caption: CaptionArgs,

    /// Directory for upload temp files (default: system temp dir)
    #[arg(long, env = "CATVOX_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,
}

/// Execute CLI command - separated for testing.
pub fn run_cli(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Serve(args) => crate::serve::execute(args.try_into()?),
        Commands::Classify(args) => crate::classify::execute(args.try_into()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_default_model_args(model: &ModelArgs) {
        assert_eq!(model.model_file, "cat_meow_classifier.onnx");
        assert_eq!(model.model_source, ModelSource::Auto);
    }

    #[test]
    fn parses_serve_defaults() {
        let cli = Cli::parse_from(["catvox", "serve"]);

        match &cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, 5000);
                assert_eq!(args.max_upload_mb, 16);
                assert_default_model_args(&args.pipeline.model);
                assert_eq!(args.pipeline.caption.caption_timeout, 10);
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_serve_with_options() {
        let cli = Cli::parse_from([
            "catvox",
            "serve",
            "--host",
            "127.0.0.1",
            "-p",
            "8080",
            "--model",
            "/opt/models",
            "--model-source",
            "path",
            "--temp-dir",
            "/tmp/uploads",
        ]);

        match &cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.host, "127.0.0.1");
                assert_eq!(args.port, 8080);
                assert_eq!(args.pipeline.model.model_id, "/opt/models");
                assert_eq!(args.pipeline.model.model_source, ModelSource::Path);
                assert!(
                    args.pipeline
                        .temp_dir
                        .as_deref()
                        .is_some_and(|p| p == std::path::Path::new("/tmp/uploads"))
                );
            }
            _ => panic!("unexpected command: {:?}", cli.command),
        }
    }

    #[test]
    fn parses_classify_command() {
        let cli = Cli::parse_from(["catvox", "classify", "meow.wav", "--pretty"]);

        assert!(matches!(
            &cli.command,
            Commands::Classify(crate::classify::Args { path, pretty: true, .. })
            if path.to_str() == Some("meow.wav")
        ));
    }

    #[test]
    fn rejects_unknown_model_source() {
        let result = Cli::try_parse_from(["catvox", "classify", "a.wav", "--model-source", "s3"]);
        assert!(result.is_err());
    }
}
