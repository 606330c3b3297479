//! Flower classification served over HTTP.
//!
//! Uploaded images are decoded, stretched to the model input size and scored
//! by a classifier that lives on a single [`InferenceEngine`] worker thread.
//! Each score vector is mapped through a [`ClassCatalog`] loaded at startup.

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod messages;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod server;

pub use catalog::{CatalogError, ClassCatalog, ClassInfo};
pub use classifier::{ClassifierConfig, ClassifierError, OnnxClassifier};
pub use config::{ConfigError, ServerArgs, ServerConfig};
pub use engine::{EngineError, EngineResponse, EngineState, InferenceEngine};
pub use messages::{HealthResponse, PredictionResult};
pub use model::{
    ClassifierModel, ClassifyMetadata, ClassifyRequest, ClassifyResponse, ImageClassifier,
    RequestMetadata, Rgb8Image,
};
pub use prediction::{PredictError, ScoreActivation, TopClass};
pub use server::{AppState, router};
