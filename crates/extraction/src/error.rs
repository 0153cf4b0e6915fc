//! Error types for extraction

use crate::orchestrator::MIN_TEXT_CHARS;

/// Terminal outcome of a failed extraction.
///
/// Retries and key rotation happen inside the orchestrator; only one of these
/// crosses its boundary per call.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("insufficient input: document text has {len} characters, at least {min} required")]
    InsufficientInput { len: usize, min: usize },

    #[error("unknown document type: {0}")]
    UnknownDocumentType(String),

    #[error("no credentials configured")]
    NoCredentials,

    #[error("could not parse response after {attempts} attempts: {excerpt}")]
    MalformedResponse { attempts: u32, excerpt: String },

    #[error("backend error after {attempts} attempts: {message}")]
    Backend { attempts: u32, message: String },

    #[error("all credentials rate-limited or failed ({rounds} rounds)")]
    Exhausted { rounds: usize },
}

impl ExtractError {
    pub(crate) fn insufficient(len: usize) -> Self {
        Self::InsufficientInput {
            len,
            min: MIN_TEXT_CHARS,
        }
    }

    /// Stable machine-readable name for error bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientInput { .. } => "insufficient_input",
            Self::UnknownDocumentType(_) => "unknown_document_type",
            Self::NoCredentials => "no_credentials",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Backend { .. } => "backend_error",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}

/// Result alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
