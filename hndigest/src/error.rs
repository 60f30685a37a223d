//! Error taxonomy shared by the digest pipeline and its collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    /// Transient collaborator-side failure; the next scheduled run is the retry.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed output from a collaborator (e.g. summarizer JSON).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DigestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DigestError::NotFound(_))
    }
}

impl From<reqwest::Error> for DigestError {
    fn from(e: reqwest::Error) -> Self {
        DigestError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;
