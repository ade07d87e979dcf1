//! Model loading and the inference seam used by the request handlers.

use std::fmt;
use std::path::Path;

use half::f16;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::tensor::TensorElementType;
use ort::value::ValueType;
use tracing::{debug, info};

use crate::error::{LoadError, PredictError};
use crate::mapping::{load_vocabulary, Vocabulary};
use crate::postprocess::{build_prediction, Activation, Prediction};
use crate::preprocess::{NormalizedImage, PreprocessConfig, Processor, ResizeMethod};

/// Serialized model, relative to the working directory.
pub const MODEL_PATH: &str = "models/export.onnx";
/// Label vocabulary, one label per line in output order.
pub const LABELS_PATH: &str = "models/labels.txt";

/// Maps a normalized image to the model's raw output vector.
pub trait Classifier: Send + Sync {
    fn classify(&self, image: &NormalizedImage) -> Result<Vec<f32>, PredictError>;
}

#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub cuda: bool,
    pub intra_threads: Option<usize>,
    /// Square input size used when the model leaves height/width dynamic.
    pub image_size: usize,
    pub resize: ResizeMethod,
    pub activation: Activation,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            cuda: false,
            intra_threads: None,
            image_size: 224,
            resize: ResizeMethod::Crop,
            activation: Activation::Softmax,
        }
    }
}

pub struct OnnxModel {
    session: Session,
    input_type: TensorElementType,
    input_size: (Option<usize>, Option<usize>),
    output_name: String,
    output_type: TensorElementType,
    output_width: Option<usize>,
}

impl OnnxModel {
    fn providers(cuda: bool) -> [ExecutionProviderDispatch; 1] {
        if cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        }
    }

    pub fn load(model_path: &Path, options: &ModelOptions) -> Result<Self, LoadError> {
        let mut builder = SessionBuilder::new()?
            .with_execution_providers(Self::providers(options.cuda))?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = options.intra_threads {
            builder = builder.with_intra_threads(threads)?;
        }
        let session = builder.commit_from_file(model_path)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| LoadError::UnsupportedInput("model declares no inputs".into()))?;
        let (input_type, input_dims) = tensor_info(&input.input_type).ok_or_else(|| {
            LoadError::UnsupportedInput(format!("input {:?} is not a tensor", input.name))
        })?;
        check_element_type(input_type).map_err(LoadError::UnsupportedInput)?;
        let input_size = image_input_size(&input_dims).map_err(LoadError::UnsupportedInput)?;

        let output = session
            .outputs
            .first()
            .ok_or_else(|| LoadError::UnsupportedOutput("model declares no outputs".into()))?;
        let (output_type, output_dims) = tensor_info(&output.output_type).ok_or_else(|| {
            LoadError::UnsupportedOutput(format!("output {:?} is not a tensor", output.name))
        })?;
        check_element_type(output_type).map_err(LoadError::UnsupportedOutput)?;
        let output_width = output_dims
            .last()
            .and_then(|&d| usize::try_from(d).ok())
            .filter(|&d| d > 0);
        let output_name = output.name.clone();

        debug!(
            input = %input.name,
            ?input_dims,
            ?input_type,
            output = %output_name,
            ?output_dims,
            ?output_type,
            "Inspected model signature"
        );

        Ok(Self {
            session,
            input_type,
            input_size,
            output_name,
            output_type,
            output_width,
        })
    }

    /// `(height, width)`, each present when the model fixes it.
    pub fn input_size(&self) -> (Option<usize>, Option<usize>) {
        self.input_size
    }

    /// Number of classes when the model fixes it.
    pub fn output_width(&self) -> Option<usize> {
        self.output_width
    }
}

impl Classifier for OnnxModel {
    fn classify(&self, image: &NormalizedImage) -> Result<Vec<f32>, PredictError> {
        let half_input;
        let inputs = if self.input_type == TensorElementType::Float16 {
            half_input = image.view().mapv(f16::from_f32);
            ort::inputs![half_input.view()]?
        } else {
            ort::inputs![image.view()]?
        };
        let outputs = self.session.run(inputs)?;
        let value = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| PredictError::MissingOutput(self.output_name.clone()))?;

        let raw = match self.output_type {
            TensorElementType::Float16 => value
                .try_extract_tensor::<f16>()?
                .iter()
                .map(|v| v.to_f32())
                .collect(),
            _ => value.try_extract_tensor::<f32>()?.iter().copied().collect(),
        };
        Ok(raw)
    }
}

impl fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxModel")
            .field("input_type", &self.input_type)
            .field("input_size", &self.input_size)
            .field("output_name", &self.output_name)
            .field("output_width", &self.output_width)
            .finish_non_exhaustive()
    }
}

fn tensor_info(value_type: &ValueType) -> Option<(TensorElementType, Vec<i64>)> {
    match value_type {
        ValueType::Tensor { ty, dimensions, .. } => Some((*ty, dimensions.clone())),
        _ => None,
    }
}

fn check_element_type(ty: TensorElementType) -> Result<(), String> {
    match ty {
        TensorElementType::Float32 | TensorElementType::Float16 => Ok(()),
        other => Err(format!("expected a float32 or float16 tensor, found {other:?}")),
    }
}

/// Validates an NCHW image input and returns its static height and width.
fn image_input_size(dims: &[i64]) -> Result<(Option<usize>, Option<usize>), String> {
    let [_, channels, height, width] = dims else {
        return Err(format!("expected a rank 4 NCHW input, found shape {dims:?}"));
    };
    if *channels > 0 && *channels != 3 {
        return Err(format!("expected 3 input channels, found {channels}"));
    }
    let fixed = |d: i64| usize::try_from(d).ok().filter(|&d| d > 0);
    Ok((fixed(*height), fixed(*width)))
}

/// Dynamic axes fall back to `fallback`.
fn resolve_input_size(size: (Option<usize>, Option<usize>), fallback: usize) -> (usize, usize) {
    (size.0.unwrap_or(fallback), size.1.unwrap_or(fallback))
}

/// The vocabulary must cover a statically known output width exactly.
fn check_output_width(output_width: Option<usize>, vocab: &Vocabulary) -> Result<(), LoadError> {
    match output_width {
        Some(outputs) if outputs != vocab.len() => Err(LoadError::VocabularyMismatch {
            labels: vocab.len(),
            outputs,
        }),
        _ => Ok(()),
    }
}

/// The inference object with everything needed to serve a request. Immutable
/// once built and shared between handlers behind an `Arc`.
pub struct LoadedModel {
    classifier: Box<dyn Classifier>,
    vocab: Vocabulary,
    processor: Processor,
    activation: Activation,
}

impl LoadedModel {
    pub fn new(
        classifier: Box<dyn Classifier>,
        vocab: Vocabulary,
        processor: Processor,
        activation: Activation,
    ) -> Self {
        Self {
            classifier,
            vocab,
            processor,
            activation,
        }
    }

    /// Decode, classify and label one uploaded image.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, PredictError> {
        let image = self.processor.decode(image_bytes)?;
        let raw = self.classifier.classify(&image)?;
        build_prediction(&self.vocab, raw, self.activation)
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("classifier", &"dyn Classifier")
            .field("vocab", &self.vocab)
            .field("processor", &self.processor)
            .field("activation", &self.activation)
            .finish()
    }
}

/// Load the model from its fixed location.
pub fn load_model(options: &ModelOptions) -> Result<LoadedModel, LoadError> {
    load_model_from(Path::new(MODEL_PATH), Path::new(LABELS_PATH), options)
}

pub fn load_model_from(
    model_path: &Path,
    labels_path: &Path,
    options: &ModelOptions,
) -> Result<LoadedModel, LoadError> {
    if !model_path.exists() {
        return Err(LoadError::ModelNotFound(model_path.to_path_buf()));
    }
    let vocab = load_vocabulary(labels_path)?;
    let model = OnnxModel::load(model_path, options)?;

    check_output_width(model.output_width(), &vocab)?;

    let (height, width) = resolve_input_size(model.input_size(), options.image_size);
    let processor = Processor::new(PreprocessConfig {
        height,
        width,
        resize: options.resize,
        ..PreprocessConfig::default()
    });

    info!(
        path = %model_path.display(),
        classes = vocab.len(),
        height,
        width,
        resize = ?options.resize,
        activation = ?options.activation,
        cuda = options.cuda,
        "Model loaded successfully"
    );

    Ok(LoadedModel::new(
        Box::new(model),
        vocab,
        processor,
        options.activation,
    ))
}
