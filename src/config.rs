use crate::{
    classifier::ClassifierConfig, prediction::ScoreActivation, preprocess::DEFAULT_INPUT_SIZE,
};
use argh::FromArgs;
use std::path::PathBuf;

// defaults for the server
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MODEL_PATH: &str = "./Plant_Island.onnx";
pub const DEFAULT_CATALOG_PATH: &str = "./data/class_catalog.json";
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("input size must be greater than zero")]
    ZeroInputSize,
    #[error("request body limit must be greater than zero")]
    ZeroBodyLimit,
}

#[derive(FromArgs, Debug)]
/// Plant Island serves flower classification over HTTP.
pub struct ServerArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    pub host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    pub port: u16,

    /// path to the ONNX classifier artifact
    #[argh(option, short = 'm', default = "PathBuf::from(DEFAULT_MODEL_PATH)")]
    pub model: PathBuf,

    /// path to the JSON class catalog
    #[argh(option, short = 'c', default = "PathBuf::from(DEFAULT_CATALOG_PATH)")]
    pub catalog: PathBuf,

    /// side length the uploads are resized to before inference
    #[argh(option, default = "DEFAULT_INPUT_SIZE")]
    pub input_size: u32,

    /// feed the model NCHW tensors instead of NHWC
    #[argh(switch)]
    pub channels_first: bool,

    /// how raw scores become probabilities: auto, softmax or raw
    #[argh(option, default = "ScoreActivation::Auto")]
    pub activation: ScoreActivation,

    /// maximum accepted request body in bytes
    #[argh(option, default = "DEFAULT_MAX_BODY_BYTES")]
    pub max_body_bytes: usize,
}

/// Validated server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub catalog_path: PathBuf,
    pub classifier: ClassifierConfig,
    pub activation: ScoreActivation,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        if args.input_size == 0 {
            return Err(ConfigError::ZeroInputSize);
        }
        if args.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            model_path: args.model,
            catalog_path: args.catalog,
            classifier: ClassifierConfig {
                input_size: args.input_size,
                channels_first: args.channels_first,
            },
            activation: args.activation,
            max_body_bytes: args.max_body_bytes,
        })
    }
}
