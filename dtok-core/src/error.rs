use thiserror::Error;

/// All errors produced by dtok-core.
#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model cannot run on this device: {0}")]
    FatalResource(String),

    #[error("resource exhausted: {0}; retry with a smaller explicit batch size")]
    ResourceExhausted(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("feature extraction error: {0}")]
    Extraction(String),

    #[error("codebook error: {0}")]
    Codebook(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TokenizerError {
    /// `true` when the failure came from running out of accelerator memory
    /// (or an equivalent allocation limit) rather than a malformed call.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, TokenizerError::ResourceExhausted(_))
    }
}

pub type Result<T> = std::result::Result<T, TokenizerError>;
