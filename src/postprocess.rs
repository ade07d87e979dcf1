use clap::ValueEnum;
use ndarray::Array1;

use crate::error::PredictError;
use crate::mapping::Vocabulary;

/// Activation applied to the raw model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Activation {
    /// The model emits logits.
    #[default]
    Softmax,
    /// The model already emits probabilities.
    #[value(name = "none")]
    Identity,
}

impl Activation {
    pub fn apply(self, raw: Vec<f32>) -> Array1<f32> {
        let raw = Array1::from(raw);
        match self {
            Activation::Softmax => softmax(&raw),
            Activation::Identity => raw,
        }
    }
}

/// Applies softmax to a 1D array (slice) and returns a new Array1<f32>.
pub fn softmax(slice: &Array1<f32>) -> Array1<f32> {
    let max_val = slice.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Array1<f32> = slice.mapv(|x| (x - max_val).exp());
    let sum_exp: f32 = exp_vals.sum();
    exp_vals.mapv(|v| v / sum_exp)
}

/// Index and value of the first maximum.
pub fn argmax_and_max(probs: &Array1<f32>) -> (usize, f32) {
    probs
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(max_idx, max_val), (i, &val)| {
            if val > max_val { (i, val) } else { (max_idx, max_val) }
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: String,
    pub probability: f32,
    /// Every label with its probability, in vocabulary order.
    pub probabilities: Vec<(String, f32)>,
}

/// Zip the vocabulary with the model output and pick the top class.
pub fn build_prediction(
    vocab: &Vocabulary,
    raw: Vec<f32>,
    activation: Activation,
) -> Result<Prediction, PredictError> {
    if raw.len() != vocab.len() {
        return Err(PredictError::OutputLength {
            expected: vocab.len(),
            actual: raw.len(),
        });
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(PredictError::NonFinite);
    }
    let probs = activation.apply(raw);
    if probs.iter().any(|v| !v.is_finite()) {
        return Err(PredictError::NonFinite);
    }

    let (idx, probability) = argmax_and_max(&probs);
    let probabilities = vocab
        .iter()
        .zip(probs.iter())
        .map(|(label, &p)| (label.to_string(), p))
        .collect::<Vec<_>>();
    let class = probabilities[idx].0.clone();

    Ok(Prediction {
        class,
        probability,
        probabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(labels: &[&str]) -> Vocabulary {
        Vocabulary::new(labels.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let out = softmax(&Array1::from(vec![1.0, 2.0, 3.0, -40.0]));
        assert!((out.sum() - 1.0).abs() < 1e-6);
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let out = softmax(&Array1::from(vec![1000.0, 1001.0]));
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        let (idx, val) = argmax_and_max(&Array1::from(vec![0.2, 0.4, 0.4]));
        assert_eq!(idx, 1);
        assert_eq!(val, 0.4);
    }

    #[test]
    fn test_build_prediction_from_logits() {
        let v = vocab(&["benign", "malignant", "normal"]);
        let pred = build_prediction(&v, vec![0.1, 2.5, -1.0], Activation::Softmax).unwrap();
        assert_eq!(pred.class, "malignant");
        let labels: Vec<_> = pred.probabilities.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["benign", "malignant", "normal"]);
        let max = pred
            .probabilities
            .iter()
            .map(|(_, p)| *p)
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(pred.probability, max);
        let sum: f32 = pred.probabilities.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_build_prediction_passes_probabilities_through() {
        let v = vocab(&["a", "b"]);
        let pred = build_prediction(&v, vec![0.25, 0.75], Activation::Identity).unwrap();
        assert_eq!(pred.class, "b");
        assert_eq!(pred.probability, 0.75);
        assert_eq!(pred.probabilities[0], ("a".to_string(), 0.25));
    }

    #[test]
    fn test_length_mismatch() {
        let v = vocab(&["a", "b", "c"]);
        match build_prediction(&v, vec![0.5, 0.5], Activation::Identity) {
            Err(PredictError::OutputLength { expected, actual }) => {
                assert_eq!((expected, actual), (3, 2))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_output() {
        let v = vocab(&["a", "b"]);
        assert!(matches!(
            build_prediction(&v, vec![f32::NAN, 1.0], Activation::Softmax),
            Err(PredictError::NonFinite)
        ));
    }
}
