//! Error types for PDF text extraction

/// Errors from turning a PDF into text.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF parse error: {0}")]
    Parse(String),

    #[error("PDF is encrypted with a non-empty password")]
    Encrypted,

    #[error("PDF has no pages")]
    NoPages,

    #[error("text extraction failed: {0}")]
    TextExtraction(String),

    #[error("PDF contains no extractable text")]
    Empty,
}

/// Result alias for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;
