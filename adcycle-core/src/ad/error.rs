use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdError {
    #[error("invalid ad field [{field}]: {message}")]
    Invalid { field: String, message: String },
    #[error("failed to encode fingerprint content: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

impl AdError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AdError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type AdResult<T> = std::result::Result<T, AdError>;
