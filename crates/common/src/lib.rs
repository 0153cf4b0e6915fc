//! Shared types for the policy-extract workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
