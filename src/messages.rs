use crate::catalog::ClassInfo;
use serde::{Deserialize, Serialize};

/// Outcome for one uploaded file. Serialized without a tag, so a client
/// sees either the prediction fields or `error`, never both.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PredictionResult {
    Success {
        filename: String,
        predicted_class: String,
        confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_info: Option<ClassInfo>,
    },
    Failure {
        filename: String,
        error: String,
    },
}

impl PredictionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PredictionResult::Success { .. })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    pub classes: usize,
}
