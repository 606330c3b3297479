use plant_island::{
    AppState, ClassCatalog, InferenceEngine, OnnxClassifier, ServerArgs, ServerConfig, router,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ServerArgs = argh::from_env();
    let config = ServerConfig::try_from(args)?;

    // everything below must load before we accept a single request
    let catalog = ClassCatalog::from_path(&config.catalog_path)?;
    let model = OnnxClassifier::load(&config.model_path, config.classifier, catalog.len())?;
    let engine = InferenceEngine::new(model);

    let state = AppState::new(engine, catalog)
        .with_input_size(config.classifier.input_size)
        .with_activation(config.activation);
    let app = router(Arc::new(state), config.max_body_bytes);

    let addr = config.address();

    log::info!("🚀 Starting the server");
    log::info!("🔥 Listening on: {}", addr);
    log::info!("🔧 Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
