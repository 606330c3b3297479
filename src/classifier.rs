use crate::{
    model::{ClassifierModel, ClassifyRequest, ClassifyResponse, Rgb8Image},
    preprocess::{DEFAULT_INPUT_SIZE, normalize},
};
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier artifact {0} does not exist")]
    Missing(PathBuf),
    #[error("classifier artifact {path} could not be loaded: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("classifier produces {actual} scores but the catalog has {expected} classes")]
    OutputWidth { expected: usize, actual: usize },
    #[error("expected a {expected}x{expected} image, got {width}x{height}")]
    InputSize {
        expected: u32,
        width: usize,
        height: usize,
    },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Shape of the tensor the artifact expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Side length of the square input image.
    pub input_size: u32,
    /// `NCHW` input instead of the Keras `NHWC` layout.
    pub channels_first: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            channels_first: false,
        }
    }
}

impl ClassifierConfig {
    fn input_shape(&self) -> [usize; 4] {
        let size = self.input_size as usize;
        if self.channels_first {
            [1, 3, size, size]
        } else {
            [1, size, size, 3]
        }
    }
}

/// Image classifier backed by an ONNX artifact, optimized once at load time.
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
    config: ClassifierConfig,
    num_classes: usize,
}

impl OnnxClassifier {
    /// Loads the artifact at `path` and checks that it scores exactly
    /// `num_classes` classes.
    pub fn load(
        path: impl AsRef<Path>,
        config: ClassifierConfig,
        num_classes: usize,
    ) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ClassifierError::Missing(path.to_path_buf()));
        }

        let malformed = |e: TractError| ClassifierError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.with_input_fact(0, f32::fact(config.input_shape()).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(malformed)?;

        let output = plan.model().output_fact(0).map_err(malformed)?;
        match output.shape.as_concrete() {
            Some(dims) => {
                let width = output_width(dims);
                if width != num_classes {
                    return Err(ClassifierError::OutputWidth {
                        expected: num_classes,
                        actual: width,
                    });
                }
            }
            None => log::warn!(
                "Output shape of {} is symbolic, checking its width per request",
                path.display()
            ),
        }

        log::info!(
            "Loaded classifier {} (input {:?}, {} classes)",
            path.display(),
            config.input_shape(),
            num_classes
        );

        Ok(Self {
            plan,
            config,
            num_classes,
        })
    }

}

/// Number of class scores in an output of shape `dims`, with or without a
/// leading batch axis.
fn output_width(dims: &[usize]) -> usize {
    dims.last().copied().unwrap_or(1)
}

/// Normalized `[1, H, W, 3]` (or `[1, 3, H, W]`) tensor for `image`.
fn input_tensor(config: &ClassifierConfig, image: &Rgb8Image) -> Result<Tensor, ClassifierError> {
    let size = image.size();
    let side = config.input_size as usize;
    if size.width != side || size.height != side {
        return Err(ClassifierError::InputSize {
            expected: config.input_size,
            width: size.width,
            height: size.height,
        });
    }

    let pixels = normalize(image);
    let tensor = if config.channels_first {
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            pixels[(y * side + x) * 3 + c]
        })
        .into_tensor()
    } else {
        tract_ndarray::Array4::from_shape_vec((1, side, side, 3), pixels)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?
            .into_tensor()
    };
    Ok(tensor)
}

impl ClassifierModel for OnnxClassifier {
    type Request = ClassifyRequest;
    type Response = ClassifyResponse;
    type Error = ClassifierError;

    fn run(&mut self, request: Self::Request) -> Result<Self::Response, Self::Error> {
        let input = input_tensor(&self.config, &request.image)?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| ClassifierError::Inference(format!("{e:#}")))?;

        let first = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".to_string()))?;
        let scores: Vec<f32> = first
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("output is not f32: {e}")))?
            .iter()
            .copied()
            .collect();

        if scores.len() != self.num_classes {
            return Err(ClassifierError::OutputWidth {
                expected: self.num_classes,
                actual: scores.len(),
            });
        }

        Ok(ClassifyResponse { scores })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kornia_image::{ImageSize, allocator::CpuAllocator};
    use std::io::Write;

    /// Writes tiny linear ONNX graphs straight in protobuf wire format.
    mod onnx_graph {
        const FLOAT: i64 = 1;
        const INT64: i64 = 7;

        fn varint(buf: &mut Vec<u8>, mut v: u64) {
            while v >= 0x80 {
                buf.push((v as u8) | 0x80);
                v >>= 7;
            }
            buf.push(v as u8);
        }

        fn int(buf: &mut Vec<u8>, field: u64, v: i64) {
            varint(buf, field << 3);
            varint(buf, v as u64);
        }

        fn bytes(buf: &mut Vec<u8>, field: u64, data: &[u8]) {
            varint(buf, (field << 3) | 2);
            varint(buf, data.len() as u64);
            buf.extend_from_slice(data);
        }

        fn msg(buf: &mut Vec<u8>, field: u64, write: impl FnOnce(&mut Vec<u8>)) {
            let mut inner = Vec::new();
            write(&mut inner);
            bytes(buf, field, &inner);
        }

        fn value_info(graph: &mut Vec<u8>, field: u64, name: &str, dims: &[i64]) {
            msg(graph, field, |info| {
                bytes(info, 1, name.as_bytes());
                msg(info, 2, |ty| {
                    msg(ty, 1, |tensor| {
                        int(tensor, 1, FLOAT);
                        msg(tensor, 2, |shape| {
                            for &d in dims {
                                msg(shape, 1, |dim| int(dim, 1, d));
                            }
                        });
                    });
                });
            });
        }

        fn initializer(graph: &mut Vec<u8>, name: &str, data_type: i64, dims: &[i64], raw: &[u8]) {
            msg(graph, 5, |tensor| {
                for &d in dims {
                    int(tensor, 1, d);
                }
                int(tensor, 2, data_type);
                bytes(tensor, 8, name.as_bytes());
                bytes(tensor, 9, raw);
            });
        }

        fn node(graph: &mut Vec<u8>, op: &str, inputs: &[&str], output: &str) {
            msg(graph, 1, |node| {
                for input in inputs {
                    bytes(node, 1, input.as_bytes());
                }
                bytes(node, 2, output.as_bytes());
                bytes(node, 4, op.as_bytes());
            });
        }

        /// `scores = flatten(pixels) x weights`, weights row-major `[features, classes]`.
        ///
        /// Without `batched` the pixels are reshaped to a vector and the output is `[classes]`.
        pub fn linear(input_dims: &[i64], weights: &[f32], classes: i64, batched: bool) -> Vec<u8> {
            let features: i64 = input_dims.iter().product();
            let raw_weights: Vec<u8> = weights.iter().flat_map(|w| w.to_le_bytes()).collect();

            let mut model = Vec::new();
            int(&mut model, 1, 7);
            msg(&mut model, 8, |opset| {
                bytes(opset, 1, b"");
                int(opset, 2, 13);
            });
            msg(&mut model, 7, |graph| {
                if batched {
                    node(graph, "Flatten", &["pixels"], "flat");
                } else {
                    node(graph, "Reshape", &["pixels", "flat_shape"], "flat");
                }
                node(graph, "MatMul", &["flat", "weights"], "scores");
                bytes(graph, 2, b"linear");
                initializer(graph, "weights", FLOAT, &[features, classes], &raw_weights);
                if !batched {
                    initializer(graph, "flat_shape", INT64, &[1], &(-1i64).to_le_bytes());
                }
                value_info(graph, 11, "pixels", input_dims);
                let output: Vec<i64> = if batched {
                    vec![1, classes]
                } else {
                    vec![classes]
                };
                value_info(graph, 12, "scores", &output);
            });
            model
        }
    }

    const SIDE: u32 = 2;
    const FEATURES: usize = (SIDE * SIDE * 3) as usize;
    const CLASSES: usize = 3;

    /// Class 0 averages every value, class 1 is always zero, class 2 copies the second value.
    fn weights() -> Vec<f32> {
        let mut w = vec![0.0; FEATURES * CLASSES];
        for row in 0..FEATURES {
            w[row * CLASSES] = 1.0 / FEATURES as f32;
        }
        w[CLASSES + 2] = 1.0;
        w
    }

    fn write_model(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn config(channels_first: bool) -> ClassifierConfig {
        ClassifierConfig {
            input_size: SIDE,
            channels_first,
        }
    }

    fn input_dims(channels_first: bool) -> Vec<i64> {
        let side = i64::from(SIDE);
        if channels_first {
            vec![1, 3, side, side]
        } else {
            vec![1, side, side, 3]
        }
    }

    fn sample_image() -> Rgb8Image {
        let data: Vec<u8> = (0..FEATURES as u8).map(|v| v * 20).collect();
        Rgb8Image::new(
            ImageSize {
                width: SIDE as usize,
                height: SIDE as usize,
            },
            data,
            CpuAllocator,
        )
        .unwrap()
    }

    fn classify(classifier: &mut OnnxClassifier) -> Vec<f32> {
        classifier
            .run(ClassifyRequest {
                filename: "sample.png".into(),
                image: sample_image(),
            })
            .unwrap()
            .scores
    }

    #[test]
    fn input_shape_follows_layout() {
        let nhwc = ClassifierConfig::default();
        assert_eq!(nhwc.input_shape(), [1, 640, 640, 3]);

        let nchw = ClassifierConfig {
            input_size: 224,
            channels_first: true,
        };
        assert_eq!(nchw.input_shape(), [1, 3, 224, 224]);
    }

    #[test]
    fn output_width_ignores_the_batch_axis() {
        assert_eq!(output_width(&[1, 13]), 13);
        assert_eq!(output_width(&[13]), 13);
    }

    #[test]
    fn both_layouts_carry_the_same_pixels() {
        let image = sample_image();
        let nhwc = input_tensor(&config(false), &image).unwrap();
        let nchw = input_tensor(&config(true), &image).unwrap();

        assert_eq!(nhwc.shape(), &[1, 2, 2, 3]);
        assert_eq!(nchw.shape(), &[1, 3, 2, 2]);

        let nhwc = nhwc.to_array_view::<f32>().unwrap();
        let nchw = nchw.to_array_view::<f32>().unwrap();
        let side = SIDE as usize;
        for c in 0..3 {
            for y in 0..side {
                for x in 0..side {
                    let expected = ((y * side + x) * 3 + c) as f32 * 20.0 / 255.0;
                    assert_eq!(nhwc[&[0, y, x, c][..]], expected);
                    assert_eq!(nchw[&[0, c, y, x][..]], expected);
                }
            }
        }
    }

    #[test]
    fn wrong_sized_image_is_rejected() {
        let big = ClassifierConfig {
            input_size: 4,
            channels_first: false,
        };
        assert!(matches!(
            input_tensor(&big, &sample_image()),
            Err(ClassifierError::InputSize { expected: 4, .. })
        ));
    }

    #[test]
    fn runs_an_nhwc_artifact() {
        let file = write_model(&onnx_graph::linear(
            &input_dims(false),
            &weights(),
            CLASSES as i64,
            true,
        ));
        let mut classifier = OnnxClassifier::load(file.path(), config(false), CLASSES).unwrap();

        let scores = classify(&mut classifier);

        let pixels = normalize(&sample_image());
        let mean = pixels.iter().sum::<f32>() / FEATURES as f32;
        assert_eq!(scores.len(), CLASSES);
        assert!((scores[0] - mean).abs() < 1e-5);
        assert_eq!(scores[1], 0.0);
        assert!((scores[2] - pixels[1]).abs() < 1e-5);
    }

    #[test]
    fn runs_an_nchw_artifact() {
        let file = write_model(&onnx_graph::linear(
            &input_dims(true),
            &weights(),
            CLASSES as i64,
            true,
        ));
        let mut classifier = OnnxClassifier::load(file.path(), config(true), CLASSES).unwrap();

        let scores = classify(&mut classifier);

        let pixels = normalize(&sample_image());
        let mean = pixels.iter().sum::<f32>() / FEATURES as f32;
        assert_eq!(scores.len(), CLASSES);
        assert!((scores[0] - mean).abs() < 1e-5);
    }

    #[test]
    fn loads_an_artifact_without_batch_axis() {
        let file = write_model(&onnx_graph::linear(
            &input_dims(false),
            &weights(),
            CLASSES as i64,
            false,
        ));
        let mut classifier = OnnxClassifier::load(file.path(), config(false), CLASSES).unwrap();

        assert_eq!(classify(&mut classifier).len(), CLASSES);
    }

    #[test]
    fn output_width_mismatch_fails_load() {
        let file = write_model(&onnx_graph::linear(
            &input_dims(false),
            &weights(),
            CLASSES as i64,
            true,
        ));

        let err = OnnxClassifier::load(file.path(), config(false), 13)
            .err()
            .unwrap();

        assert!(matches!(
            err,
            ClassifierError::OutputWidth {
                expected: 13,
                actual: CLASSES
            }
        ));
    }

    #[test]
    fn missing_artifact_fails_load() {
        let err = OnnxClassifier::load(
            "/definitely/not/here.onnx",
            ClassifierConfig::default(),
            13,
        )
        .err()
        .unwrap();

        assert!(matches!(err, ClassifierError::Missing(_)));
    }

    #[test]
    fn garbage_artifact_fails_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a protobuf graph").unwrap();

        let err = OnnxClassifier::load(file.path(), ClassifierConfig::default(), 13)
            .err()
            .unwrap();

        assert!(matches!(err, ClassifierError::Malformed { .. }));
        assert!(err.to_string().contains("could not be loaded"));
    }
}
