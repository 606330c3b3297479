use crate::{
    catalog::ClassCatalog,
    engine::InferenceEngine,
    messages::{HealthResponse, PredictionResult},
    model::{ClassifyRequest, ImageClassifier},
    prediction::{PredictError, ScoreActivation, top_class},
    preprocess::{self, DEFAULT_INPUT_SIZE},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Multipart field the uploads are sent under.
pub const UPLOAD_FIELD: &str = "files";

/// Shared, read-only state handed to every request.
pub struct AppState<M: ImageClassifier> {
    engine: InferenceEngine<M>,
    catalog: ClassCatalog,
    input_size: u32,
    activation: ScoreActivation,
}

impl<M: ImageClassifier> AppState<M> {
    pub fn new(engine: InferenceEngine<M>, catalog: ClassCatalog) -> Self {
        Self {
            engine,
            catalog,
            input_size: DEFAULT_INPUT_SIZE,
            activation: ScoreActivation::default(),
        }
    }

    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn with_activation(mut self, activation: ScoreActivation) -> Self {
        self.activation = activation;
        self
    }

    /// Classifies one upload. Never fails: errors become a
    /// [`PredictionResult::Failure`] for this file only.
    pub async fn classify(&self, filename: String, bytes: Bytes) -> PredictionResult {
        match self.try_classify(&filename, bytes).await {
            Ok((predicted_class, confidence)) => {
                let class_info = self.catalog.info(&predicted_class).cloned();
                PredictionResult::Success {
                    filename,
                    predicted_class,
                    confidence,
                    class_info,
                }
            }
            Err(e) => {
                log::warn!("Failed to classify {filename:?}: {e}");
                PredictionResult::Failure {
                    filename,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_classify(
        &self,
        filename: &str,
        bytes: Bytes,
    ) -> Result<(String, f64), PredictError> {
        let size = self.input_size;
        let image =
            tokio::task::spawn_blocking(move || preprocess::prepare(&bytes, size)).await??;

        let result = self
            .engine
            .infer(ClassifyRequest {
                filename: filename.to_string(),
                image,
            })
            .await?;

        let scores = &result.response.scores;
        if scores.len() != self.catalog.len() {
            return Err(PredictError::ScoreWidth {
                expected: self.catalog.len(),
                actual: scores.len(),
            });
        }

        let top = top_class(scores, self.activation)?;
        let name = self
            .catalog
            .name(top.index)
            .ok_or(PredictError::UnknownClass {
                index: top.index,
                classes: self.catalog.len(),
            })?;

        log::debug!(
            "{filename:?} -> {name} ({:.2}%) in {:?}",
            top.confidence(),
            result.duration
        );

        Ok((name.to_string(), top.confidence()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no files uploaded")]
    NoFiles,
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NoFiles => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            ApiError::Multipart(e) => e.into_response(),
        }
    }
}

/// Builds the HTTP surface: `POST /predict/`, `GET /health` and a banner on `/`.
pub fn router<M: ImageClassifier>(state: Arc<AppState<M>>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(|| async { "Welcome to Plant Island!" }))
        .route("/health", get(health::<M>))
        .route("/predict/", post(predict::<M>))
        .route("/predict", post(predict::<M>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health<M: ImageClassifier>(State(state): State<Arc<AppState<M>>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        engine: state.engine.state().as_str().to_string(),
        classes: state.catalog.len(),
    })
}

async fn predict<M: ImageClassifier>(
    State(state): State<Arc<AppState<M>>>,
    mut multipart: Multipart,
) -> Result<Json<Vec<PredictionResult>>, ApiError> {
    let mut results = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            log::debug!("Skipping field {:?}", field.name());
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_owned();
        let bytes = field.bytes().await?;
        log::debug!("Received {filename:?} ({} bytes)", bytes.len());

        results.push(state.classify(filename, bytes).await);
    }

    if results.is_empty() {
        return Err(ApiError::NoFiles);
    }

    log::info!(
        "Classified {} file(s), {} failed",
        results.len(),
        results.iter().filter(|r| !r.is_success()).count()
    );

    Ok(Json(results))
}
