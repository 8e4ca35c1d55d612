//! HTTP surface: upload form, JSON prediction and status endpoints.

pub mod handlers;
pub mod page;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::routing::{get, post};
use catvox_core::pipeline::Pipeline;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared request state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub max_upload_mb: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, max_upload_mb: usize) -> Self {
        Self {
            pipeline,
            max_upload_mb,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/", get(handlers::index_handler).post(handlers::index_upload_handler))
        .route("/predict", post(handlers::predict_handler))
        .route("/system-status", get(handlers::system_status_handler))
        .route("/health", get(handlers::health_handler))
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes()))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(trace_layer)
        .with_state(state)
}
