pub mod cli;
pub mod error;
pub mod mapping;
pub mod model;
pub mod postprocess;
pub mod preprocess;
pub mod service;

pub use crate::cli::Args;
pub use crate::error::{ApiError, DecodeError, LoadError, PredictError};
pub use crate::mapping::{load_vocabulary, Vocabulary};
pub use crate::model::{load_model, Classifier, LoadedModel, ModelOptions, OnnxModel};
pub use crate::postprocess::{Activation, Prediction};
pub use crate::preprocess::{NormalizedImage, PreprocessConfig, Processor, ResizeMethod};
pub use crate::service::{create_router, run_server, AppState, ServerConfig};
