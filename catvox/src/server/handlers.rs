use crate::server::AppState;
use crate::server::page::{PageResult, render_index};
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use catvox_core::classifier::INPUT_SHAPE;
use catvox_core::pipeline::{ResponseEnvelope, shape_string};
use catvox_core::types::{AudioFormat, AudioUpload};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinError;

/// Multipart field carrying the audio upload.
pub const UPLOAD_FIELD: &str = "audio_file";

const SERVER_ERROR_MESSAGE: &str = "Server error occurred";

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Why a multipart body could not be read.
#[derive(Debug)]
pub enum UploadRejection {
    TooLarge { max_mb: usize },
    Malformed(String),
}

impl UploadRejection {
    fn from_multipart(e: MultipartError, max_mb: usize) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadRejection::TooLarge { max_mb }
        } else {
            UploadRejection::Malformed(e.body_text())
        }
    }
}

impl IntoResponse for UploadRejection {
    fn into_response(self) -> Response {
        match self {
            UploadRejection::TooLarge { max_mb } => {
                tracing::warn!(max_mb, "upload too large");
                error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("File too large (max {max_mb}MB)"),
                )
            }
            UploadRejection::Malformed(reason) => {
                tracing::warn!(%reason, "malformed multipart body");
                error_response(StatusCode::BAD_REQUEST, "Invalid upload")
            }
        }
    }
}

/// Read the `audio_file` field, skipping any other fields.
async fn read_upload(
    multipart: &mut Multipart,
    max_mb: usize,
) -> Result<Option<AudioUpload>, UploadRejection> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(UploadRejection::from_multipart(e, max_mb)),
        };

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or("unknown").to_string();

        let bytes = field
            .bytes()
            .await
            .map_err(|e| UploadRejection::from_multipart(e, max_mb))?;

        tracing::info!(%filename, %content_type, size = bytes.len(), "received file");

        return Ok(Some(AudioUpload::new(filename, bytes.to_vec())));
    }
}

/// Run the blocking pipeline off the async workers.
async fn run_pipeline(state: &AppState, upload: AudioUpload) -> Result<ResponseEnvelope, JoinError> {
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || pipeline.handle(&upload)).await
}

pub async fn index_handler() -> Html<String> {
    Html(render_index(None))
}

#[tracing::instrument(skip_all)]
pub async fn index_upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let result = match read_upload(&mut multipart, state.max_upload_mb).await {
        Ok(Some(upload)) => match run_pipeline(&state, upload).await {
            Ok(envelope) => PageResult::from(&envelope),
            Err(e) => {
                tracing::error!(error = %e, "pipeline task failed");
                PageResult::message(SERVER_ERROR_MESSAGE)
            }
        },
        Ok(None) => PageResult::message("No audio file provided"),
        Err(rejection @ UploadRejection::TooLarge { .. }) => return rejection.into_response(),
        Err(UploadRejection::Malformed(reason)) => {
            tracing::warn!(%reason, "malformed multipart body");
            PageResult::message("No audio file provided")
        }
    };

    Html(render_index(Some(&result))).into_response()
}

#[tracing::instrument(skip_all)]
pub async fn predict_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart, state.max_upload_mb).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            tracing::warn!("predict request with no file");
            return error_response(StatusCode::BAD_REQUEST, "No audio file provided");
        }
        Err(rejection) => return rejection.into_response(),
    };

    match run_pipeline(&state, upload).await {
        Ok(envelope) => {
            let status = if envelope.is_success() {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(envelope)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "pipeline task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE)
        }
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_path_exists: bool,
    pub model_type: &'static str,
    pub scaler_required: bool,
    pub optimal_format: &'static str,
    pub supported_formats: Vec<&'static str>,
    pub input_shape: String,
    pub caption_ai_available: bool,
    pub timestamp: String,
}

pub async fn system_status_handler(State(state): State<AppState>) -> Json<SystemStatus> {
    let classifier = state.pipeline.classifier();
    let model_loaded = classifier.is_loaded();

    Json(SystemStatus {
        status: "OK",
        model_loaded,
        model_path_exists: classifier.model_path().is_some_and(Path::is_file),
        model_type: "CNN_2D",
        scaler_required: false,
        optimal_format: AudioFormat::Wav.extension(),
        supported_formats: AudioFormat::ALL.iter().map(|f| f.extension()).collect(),
        input_shape: if model_loaded {
            shape_string(INPUT_SHAPE)
        } else {
            "Model not loaded".to_string()
        },
        caption_ai_available: state.pipeline.captions().has_generator(),
        timestamp: timestamp(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub expected_input_shape: String,
    pub caption_ai_available: bool,
    pub timestamp: String,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.pipeline.classifier().is_loaded(),
        expected_input_shape: shape_string(INPUT_SHAPE),
        caption_ai_available: state.pipeline.captions().has_generator(),
        timestamp: timestamp(),
    })
}

pub async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Resource not found")
}
