//! Error types for loading, decoding, prediction and the HTTP boundary

use std::backtrace::Backtrace;
use std::path::PathBuf;

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Fatal errors raised while loading the model at startup.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Model file not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Label vocabulary not found at {}", .0.display())]
    VocabularyNotFound(PathBuf),

    #[error("Label vocabulary is empty")]
    EmptyVocabulary,

    #[error("Label vocabulary contains duplicate label {0:?}")]
    DuplicateLabel(String),

    #[error("Model outputs {outputs} classes but the vocabulary has {labels} labels")]
    VocabularyMismatch { labels: usize, outputs: usize },

    #[error("Unsupported model input: {0}")]
    UnsupportedInput(String),

    #[error("Unsupported model output: {0}")]
    UnsupportedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ONNX Runtime error: {0}")]
    Runtime(#[from] ort::Error),
}

/// Errors turning uploaded bytes into a normalized image.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty image payload")]
    Empty,

    #[error("Cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Resize failed: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error("Resized buffer does not match the target dimensions")]
    Buffer,
}

/// Errors raised anywhere between reading the upload and building a prediction.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Cannot read uploaded image: {0}")]
    Upload(#[from] MultipartError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Inference failed: {0}")]
    Runtime(#[from] ort::Error),

    #[error("Model produced no output named {0:?}")]
    MissingOutput(String),

    #[error("Model output has {actual} values but the vocabulary has {expected} labels")]
    OutputLength { expected: usize, actual: usize },

    #[error("Model output contains non-finite values")]
    NonFinite,

    #[error("Prediction worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub const MODEL_NOT_LOADED: &str = "Model not loaded";
pub const NO_IMAGE_PROVIDED: &str = "No image provided";
pub const PREDICTION_FAILED: &str = "Error making prediction. Please try again";

/// Errors returned by the HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("No image provided")]
    MissingImage,

    /// `details` is only populated when the server runs in debug mode.
    #[error("Error during prediction: {source}")]
    Prediction {
        source: PredictError,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn prediction(source: PredictError, debug: bool) -> Self {
        let details = debug.then(|| source.to_string());
        ApiError::Prediction { source, details }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PredictionErrorBody {
    pub error: &'static str,
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::ModelNotLoaded => {
                tracing::error!("Prediction requested but no model is loaded");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody { error: MODEL_NOT_LOADED }),
                )
                    .into_response()
            }
            ApiError::MissingImage => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody { error: NO_IMAGE_PROVIDED }),
            )
                .into_response(),
            ApiError::Prediction { source, details } => {
                tracing::error!(error = %source, "Error during prediction");
                tracing::error!("Diagnostic: {:?}", anyhow::Error::new(source));
                tracing::error!("Traceback:\n{}", Backtrace::force_capture());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(PredictionErrorBody {
                        error: PREDICTION_FAILED,
                        details,
                    }),
                )
                    .into_response()
            }
        }
    }
}
