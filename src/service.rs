//! HTTP surface: health check and image prediction.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::error::{ApiError, PredictError};
use crate::model::LoadedModel;
use crate::postprocess::Prediction;

/// Name of the multipart file field carrying the image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            debug: true,
            max_upload_size: 100 * 1024 * 1024,
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub model: Option<Arc<LoadedModel>>,
    pub debug: bool,
}

impl AppState {
    pub fn new(model: Option<LoadedModel>, debug: bool) -> Self {
        Self {
            model: model.map(Arc::new),
            debug,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub class: String,
    pub probability: f64,
    pub probabilities: BTreeMap<String, f64>,
}

impl From<Prediction> for PredictionResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            class: prediction.class,
            probability: prediction.probability as f64,
            probabilities: prediction
                .probabilities
                .into_iter()
                .map(|(label, p)| (label, p as f64))
                .collect(),
        }
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.model.is_some(),
    })
}

struct Upload {
    filename: String,
    bytes: Bytes,
}

/// Finds the first file field named `image`. Stream errors before the field is
/// found mean no image was provided; errors reading the field itself are
/// prediction failures.
async fn read_image_field(mut multipart: Multipart) -> Result<Option<Upload>, PredictError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "Malformed multipart body");
                return Ok(None);
            }
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        return Ok(Some(Upload { filename, bytes }));
    }
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Some(model) = state.model.clone() else {
        return Err(ApiError::ModelNotLoaded);
    };

    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(%rejection, "Request is not a multipart upload");
            return Err(ApiError::MissingImage);
        }
    };
    let upload = read_image_field(multipart)
        .await
        .map_err(|e| ApiError::prediction(e, state.debug))?
        .ok_or(ApiError::MissingImage)?;

    info!(
        filename = %upload.filename,
        size = upload.bytes.len(),
        "Received image"
    );

    let prediction = tokio::task::spawn_blocking(move || model.predict(&upload.bytes))
        .await
        .map_err(PredictError::from)
        .and_then(|result| result)
        .map_err(|e| ApiError::prediction(e, state.debug))?;

    info!(
        class = %prediction.class,
        probability = prediction.probability,
        "Prediction successful"
    );

    Ok(Json(prediction.into()))
}

/// Create the main application router
pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/predict", post(predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until ctrl+c.
pub async fn run_server(config: ServerConfig, model: LoadedModel) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    if config.debug {
        warn!("Debug mode is enabled: error details are returned to clients");
    }

    let state = Arc::new(AppState::new(Some(model), config.debug));
    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        address = %addr,
        debug = config.debug,
        max_upload_size_mb = config.max_upload_size / 1024 / 1024,
        "Starting application on port {}",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, pid = std::process::id(), "Server listening and ready to accept connections");

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl+c, shutting down");
        }
        let uptime = chrono::Utc::now().signed_duration_since(start_time);
        info!(
            uptime_secs = uptime.num_seconds(),
            "Shutdown signal received, stopping server gracefully"
        );
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert!(config.debug);
        assert_eq!(config.max_upload_size, 100 * 1024 * 1024);
    }

    #[test]
    fn test_prediction_response_shape() {
        let response: PredictionResponse = Prediction {
            class: "benign".to_string(),
            probability: 0.75,
            probabilities: vec![
                ("malignant".to_string(), 0.25),
                ("benign".to_string(), 0.75),
            ],
        }
        .into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "class": "benign",
                "probability": 0.75,
                "probabilities": {"benign": 0.75, "malignant": 0.25},
            })
        );
    }

    #[test]
    fn test_health_response_shape() {
        let json = serde_json::to_value(HealthResponse {
            status: "healthy",
            model_loaded: false,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "healthy", "model_loaded": false}));
    }
}
