//! Classify subcommand - run one audio file through the pipeline.

use crate::cli::PipelineArgs;
use crate::config::PipelineConfig;
use catvox_core::pipeline::{Pipeline, ResponseEnvelope};
use catvox_core::types::AudioUpload;
use eyre::{Context, OptionExt, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// CLI arguments for single-file classification.
#[derive(clap::Args, Debug)]
pub struct Args {
    /// Path to a WAV, MP3 or WebM file
    pub path: PathBuf,

    /// Pretty-print the JSON response
    #[arg(long)]
    pub pretty: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Resolved configuration for single-file classification.
#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
    pub pretty: bool,
    pub pipeline: PipelineConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            path: args.path,
            pretty: args.pretty,
            pipeline: args.pipeline.try_into()?,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let pipeline = config.pipeline.build()?;

    let s = Instant::now();

    let envelope = classify_file(&pipeline, &config.path)?;

    let d = s.elapsed();
    tracing::info!(duration = %format!("{:.2}s", d.as_secs_f32()), "classification finished");

    let json = if config.pretty {
        serde_json::to_string_pretty(&envelope)?
    } else {
        serde_json::to_string(&envelope)?
    };
    println!("{json}");

    match envelope.error_message() {
        Some(message) => Err(eyre::eyre!("classification failed: {message}")),
        None => Ok(()),
    }
}

/// Read a file and handle it exactly as an upload with the same name.
pub fn classify_file(pipeline: &Pipeline, path: &Path) -> Result<ResponseEnvelope> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_eyre("input path has no file name")?
        .to_string();

    let bytes =
        std::fs::read(path).wrap_err_with(|| format!("failed to read audio: {:?}", path.display()))?;

    tracing::info!(input = ?path.display(), size = bytes.len(), "classifying file");

    Ok(pipeline.handle(&AudioUpload::new(filename, bytes)))
}
