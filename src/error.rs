use thiserror::Error;

#[derive(Error, Debug)]
pub enum WindflowError {
    #[error("WebSocket error: {0}")]
    TransportError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Merge error in {section}: {reason}")]
    MergeError { section: String, reason: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Data source error: {0}")]
    SourceError(String),
}

impl WindflowError {
    pub(crate) fn merge(section: impl Into<String>, reason: impl ToString) -> Self {
        WindflowError::MergeError {
            section: section.into(),
            reason: reason.to_string(),
        }
    }
}
