//! Error handling for the Zellie inference bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZellieError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ZellieError>;

impl ZellieError {
    pub fn is_model_load(&self) -> bool {
        matches!(self, ZellieError::ModelLoad(_))
    }

    pub fn is_inference(&self) -> bool {
        matches!(self, ZellieError::Inference(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ZellieError::InvalidArgument(_))
    }
}

/// Candle errors raised outside of model loading surface as inference failures.
/// Loading code maps its candle errors to `ModelLoad` explicitly.
impl From<candle_core::Error> for ZellieError {
    fn from(err: candle_core::Error) -> Self {
        ZellieError::Inference(err.to_string())
    }
}
