//! Service-specific error types

use axum::http::StatusCode;
use extraction::ExtractError;
use pdf_text::PdfError;
use thiserror::Error;

/// Failures of one extraction request, from upload to written record.
///
/// The HTTP layer maps each variant to a status code and a stable `type`
/// string; the CLI just prints the message.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Machine-readable error type for response bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Pdf(_) => "pdf_error",
            Error::Extract(e) => e.kind(),
            Error::InvalidRequest(_) => "invalid_request",
            Error::Task(_) | Error::Output(_) | Error::Serialize(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Pdf(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Extract(e) => match e {
                ExtractError::InsufficientInput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ExtractError::UnknownDocumentType(_) => StatusCode::BAD_REQUEST,
                ExtractError::MalformedResponse { .. } | ExtractError::Backend { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                ExtractError::NoCredentials | ExtractError::Exhausted { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            Error::Task(_) | Error::Output(_) | Error::Serialize(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
