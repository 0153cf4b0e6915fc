//! Generation backend abstraction
//!
//! Defines the `GenerationBackend` trait that decouples the extraction
//! orchestrator from the concrete LLM API. The orchestrator hands the backend
//! a credential and a prompt and receives the raw reply text or an error whose
//! message the key pool can classify (rate limit vs transient).

pub mod gemini;

pub use gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiBackend};

use std::future::Future;
use std::pin::Pin;

/// Errors from a generation call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{status} {}: {body}", status_reason(.status))]
    Status { status: u16, body: String },

    #[error("backend returned no text")]
    EmptyResponse,

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

fn status_reason(status: &u16) -> &'static str {
    reqwest::StatusCode::from_u16(*status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// A text-generation service reachable with a per-call credential.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn GenerationBackend>`).
pub trait GenerationBackend: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Model identifier sent with every request
    fn model(&self) -> &str;

    /// Submit a single prompt and return the reply text.
    fn generate<'a>(
        &'a self,
        credential: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}
