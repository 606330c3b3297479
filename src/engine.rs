use crate::model::{ClassifierModel, RequestMetadata};
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

// Type aliases to simplify complex types
type Metadata<M> = <<M as ClassifierModel>::Request as RequestMetadata>::Metadata;
type EngineReply<M> =
    Result<EngineResponse<Metadata<M>, <M as ClassifierModel>::Response>, EngineError>;

/// Represents the current state of the inference engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineState {
    /// The engine is idle and ready to accept new inference requests.
    Idle,
    /// The engine is currently processing an inference request.
    Processing,
}

impl EngineState {
    /// Returns the state as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Processing => "processing",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("inference engine is stopped")]
    Stopped,
    #[error("inference engine dropped the request before replying")]
    Dropped,
    #[error("inference failed: {0}")]
    Model(String),
}

/// Internal request wrapper used by the engine to track inference requests.
struct EngineRequest<M: ClassifierModel>
where
    M::Request: RequestMetadata,
{
    id: u64,
    request: M::Request,
    reply: oneshot::Sender<EngineReply<M>>,
}

/// Response returned by the engine containing both the model's response and telemetry data.
#[derive(Debug)]
pub struct EngineResponse<Metadata, Res> {
    /// Identifier assigned when the request was queued.
    pub id: u64,
    /// Timestamp when the inference started.
    pub start_time: Instant,
    /// Total time taken for the inference.
    pub duration: Duration,
    /// Lightweight metadata extracted from the original request.
    pub request_metadata: Metadata,
    /// The actual response from the model.
    pub response: Res,
}

/// Owns a model on a dedicated thread and serializes inference calls to it.
///
/// Any number of async callers may share the engine; each call is queued on a
/// channel and answered over a oneshot, so the model itself never needs to be
/// reentrant. A failing inference is reported to its caller only and the
/// worker keeps serving.
pub struct InferenceEngine<M: ClassifierModel + Send + 'static>
where
    M::Request: Send + RequestMetadata + 'static,
    M::Response: Send + 'static,
{
    state: Arc<Mutex<EngineState>>,
    req_tx: Option<mpsc::Sender<EngineRequest<M>>>,
    inference_handle: Option<JoinHandle<()>>,
    id_counter: AtomicU64,
}

impl<M: ClassifierModel + Send + 'static> InferenceEngine<M>
where
    M::Request: Send + RequestMetadata + 'static,
    M::Response: Send + 'static,
{
    /// Creates a new inference engine, moving `model` onto a background thread.
    pub fn new(mut model: M) -> Self {
        let (req_tx, req_rx) = mpsc::channel::<EngineRequest<M>>();
        let state = Arc::new(Mutex::new(EngineState::Idle));

        let inference_handle = std::thread::spawn({
            let state = state.clone();
            move || {
                while let Ok(req) = req_rx.recv() {
                    // Extract lightweight metadata before consuming the request
                    let request_metadata = req.request.metadata();
                    log::debug!("Scheduling inference #{}: {:?}", req.id, request_metadata);

                    set_state(&state, EngineState::Processing);
                    let start_time = Instant::now();

                    let reply = match model.run(req.request) {
                        Ok(response) => {
                            log::debug!(
                                "Inference #{} completed in {:?}",
                                req.id,
                                start_time.elapsed()
                            );
                            Ok(EngineResponse {
                                id: req.id,
                                start_time,
                                duration: start_time.elapsed(),
                                request_metadata,
                                response,
                            })
                        }
                        Err(e) => {
                            log::warn!("Inference #{} failed: {}", req.id, e);
                            Err(EngineError::Model(e.to_string()))
                        }
                    };

                    set_state(&state, EngineState::Idle);

                    // the caller may have gone away, nothing to do then
                    let _ = req.reply.send(reply);
                }
                log::debug!("Inference worker shutting down");
            }
        });

        Self {
            state,
            req_tx: Some(req_tx),
            inference_handle: Some(inference_handle),
            id_counter: AtomicU64::new(0),
        }
    }

    /// Returns the current state of the inference engine.
    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `request` and waits for the worker to answer it.
    pub async fn infer(&self, request: M::Request) -> EngineReply<M> {
        let tx = self.req_tx.as_ref().ok_or(EngineError::Stopped)?;
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        tx.send(EngineRequest { id, request, reply })
            .map_err(|_| EngineError::Stopped)?;

        rx.await.map_err(|_| EngineError::Dropped)?
    }

    /// Stops the inference engine and shuts down the background thread.
    ///
    /// Closes the request channel and waits for the worker to drain the
    /// requests already queued.
    pub fn stop(&mut self) {
        self.req_tx.take();
        if let Some(handle) = self.inference_handle.take() {
            if handle.join().is_err() {
                log::error!("Inference worker panicked");
            }
        }
    }
}

impl<M: ClassifierModel + Send + 'static> Drop for InferenceEngine<M>
where
    M::Request: Send + RequestMetadata + 'static,
    M::Response: Send + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_state(state: &Mutex<EngineState>, next: EngineState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}
