use kornia_image::{Image, ImageSize, allocator::CpuAllocator};

/// RGB image in interleaved `HWC` layout, as handed to a classifier.
pub type Rgb8Image = Image<u8, 3, CpuAllocator>;

/// Trait for implementing inference models that can be used with the [`InferenceEngine`].
///
/// Users implement this trait to define their model behavior, including
/// the request and response types and the inference logic.
///
/// [`InferenceEngine`]: crate::InferenceEngine
pub trait ClassifierModel {
    /// The request type that the model accepts for inference.
    type Request;
    /// The response type that the model returns after inference.
    type Response;
    /// The error type that can be returned during inference.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs inference on the given request and returns a response or error.
    fn run(&mut self, request: Self::Request) -> Result<Self::Response, Self::Error>;
}

/// Trait for extracting lightweight metadata from inference requests.
///
/// This lets the engine keep what it needs for logging and telemetry without
/// cloning heavy data like images.
pub trait RequestMetadata {
    /// The lightweight metadata type that represents the request.
    type Metadata: std::fmt::Debug + Send + 'static;

    /// Extracts lightweight metadata from the request.
    fn metadata(&self) -> Self::Metadata;
}

/// A single uploaded image, already resized to the model input footprint.
pub struct ClassifyRequest {
    pub filename: String,
    pub image: Rgb8Image,
}

#[derive(Debug, Clone)]
pub struct ClassifyMetadata {
    pub filename: String,
    pub image_size: ImageSize,
}

impl RequestMetadata for ClassifyRequest {
    type Metadata = ClassifyMetadata;

    fn metadata(&self) -> Self::Metadata {
        ClassifyMetadata {
            filename: self.filename.clone(),
            image_size: self.image.size(),
        }
    }
}

/// Raw per-class scores, one entry per catalog position.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyResponse {
    pub scores: Vec<f32>,
}

/// A [`ClassifierModel`] that classifies uploaded images.
///
/// Blanket-implemented; exists so server code can name a single bound.
pub trait ImageClassifier:
    ClassifierModel<Request = ClassifyRequest, Response = ClassifyResponse> + Send + 'static
{
}

impl<T> ImageClassifier for T where
    T: ClassifierModel<Request = ClassifyRequest, Response = ClassifyResponse> + Send + 'static
{
}
