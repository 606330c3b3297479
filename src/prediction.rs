use crate::{engine::EngineError, preprocess::PreprocessError};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How raw classifier scores are turned into probabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreActivation {
    /// Use the scores as-is when every one lies in `[0, 1]`, softmax otherwise.
    #[default]
    Auto,
    /// Always apply softmax.
    Softmax,
    /// Never transform; the resulting confidence is clamped into `[0, 100]`.
    Raw,
}

impl ScoreActivation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreActivation::Auto => "auto",
            ScoreActivation::Softmax => "softmax",
            ScoreActivation::Raw => "raw",
        }
    }

    pub fn apply(&self, scores: &[f32]) -> Vec<f32> {
        match self {
            ScoreActivation::Auto if is_bounded(scores) => scores.to_vec(),
            ScoreActivation::Auto | ScoreActivation::Softmax => softmax(scores),
            ScoreActivation::Raw => scores.to_vec(),
        }
    }
}

impl fmt::Display for ScoreActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreActivation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ScoreActivation::Auto),
            "softmax" => Ok(ScoreActivation::Softmax),
            "raw" => Ok(ScoreActivation::Raw),
            other => Err(format!(
                "unknown score activation {other:?}, expected auto, softmax or raw"
            )),
        }
    }
}

/// Everything that can go wrong while classifying a single upload.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("preprocessing task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
    #[error("model returned no scores")]
    NoScores,
    #[error("model returned a non-finite score")]
    NonFinite,
    #[error("model returned {actual} scores but the catalog has {expected} classes")]
    ScoreWidth { expected: usize, actual: usize },
    #[error("predicted index {index} is outside the {classes}-class catalog")]
    UnknownClass { index: usize, classes: usize },
}

/// Index and probability of the best scoring class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopClass {
    pub index: usize,
    pub probability: f32,
}

impl TopClass {
    /// Probability expressed as a percentage in `[0, 100]`.
    pub fn confidence(&self) -> f64 {
        (f64::from(self.probability) * 100.0).clamp(0.0, 100.0)
    }
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Whether every score already reads as a probability.
pub fn is_bounded(scores: &[f32]) -> bool {
    scores.iter().all(|s| (0.0..=1.0).contains(s))
}

/// Argmax over `scores` after running them through `activation`.
///
/// Ties resolve to the lowest index.
pub fn top_class(scores: &[f32], activation: ScoreActivation) -> Result<TopClass, PredictError> {
    if scores.is_empty() {
        return Err(PredictError::NoScores);
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(PredictError::NonFinite);
    }

    let probabilities = activation.apply(scores);
    let (index, probability) = probabilities.iter().copied().enumerate().fold(
        (0, f32::NEG_INFINITY),
        |best, (i, p)| if p > best.1 { (i, p) } else { best },
    );

    Ok(TopClass { index, probability })
}
