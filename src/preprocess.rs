use crate::model::Rgb8Image;
use image::imageops::{self, FilterType};
use kornia_image::{ImageSize, allocator::CpuAllocator};

/// Side length of the square model input.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("uploaded file is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to build model input: {0}")]
    Layout(#[from] kornia_image::ImageError),
}

/// Decodes `bytes` (format guessed from content) into an RGB8 image.
pub fn decode_rgb(bytes: &[u8]) -> Result<image::RgbImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Empty);
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Stretches `img` to `size`x`size`, ignoring its aspect ratio.
pub fn resize_square(img: &image::RgbImage, size: u32) -> Result<Rgb8Image, PreprocessError> {
    let resized = imageops::resize(img, size, size, FilterType::CatmullRom);
    let image = Rgb8Image::new(
        ImageSize {
            width: size as usize,
            height: size as usize,
        },
        resized.into_raw(),
        CpuAllocator,
    )?;
    Ok(image)
}

/// Decode, convert and resize an upload into a model-ready image.
pub fn prepare(bytes: &[u8], size: u32) -> Result<Rgb8Image, PreprocessError> {
    let rgb = decode_rgb(bytes)?;
    log::trace!("Decoded {}x{} image", rgb.width(), rgb.height());
    resize_square(&rgb, size)
}

/// Scales every channel value into `[0, 1]`, keeping the `HWC` order.
pub fn normalize(image: &Rgb8Image) -> Vec<f32> {
    image
        .as_slice()
        .iter()
        .map(|&v| f32::from(v) / 255.0)
        .collect()
}
