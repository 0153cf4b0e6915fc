//! Rate-limit detection for backend error messages
//!
//! The backend surfaces failures as text (status line plus response body), so
//! detection is a case-insensitive substring match. Anything that is not
//! recognisably a quota or rate-limit condition is transient.

/// Markers that identify per-key quota exhaustion in Gemini error messages.
const RATE_LIMIT_MARKERS: &[&str] = &["429", "too many requests", "resource_exhausted", "quota"];

/// Whether an error message describes a rate-limit or quota condition.
pub fn is_rate_limited(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}
