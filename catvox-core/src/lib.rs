//! catvox-core: cat vocalization classification pipeline.
//!
//! Turns one uploaded audio file into one response envelope carrying the
//! predicted label, its probability distribution and a short caption.
//!
//! # Architecture
//!
//! Each stage sits behind a small API so the [`pipeline::Pipeline`] can be
//! assembled from real or mock parts:
//!
//! - [`audio`]: WAV header validation and decoding (native, then resampled fallback)
//! - [`features`]: fixed-shape 40x130 MFCC matrices
//! - [`classifier::Classifier`]: 13-class model over `(1, 40, 130, 1)` input
//! - [`caption::TextGenerator`]: optional caption service with a static fallback table
//!
//! # Quick Start
//!
//! ```ignore
//! use catvox_core::caption::CaptionGenerator;
//! use catvox_core::classifier::{ClassifierAdapter, MODEL_FILE};
//! use catvox_core::pipeline::Pipeline;
//! use catvox_core::types::{AudioUpload, ModelRepo};
//! use ort::session::Session;
//!
//! let repo = ModelRepo::Path("model".into());
//! let classifier = ClassifierAdapter::load(&repo, MODEL_FILE, Session::builder()?);
//! let pipeline = Pipeline::new(classifier, CaptionGenerator::fallback_only());
//!
//! let upload = AudioUpload::new("meow.wav", std::fs::read("meow.wav")?);
//! println!("{}", serde_json::to_string(&pipeline.handle(&upload))?);
//! ```

pub mod audio;
pub mod caption;
pub mod classifier;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod types;
