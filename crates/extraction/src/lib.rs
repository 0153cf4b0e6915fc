//! Insurance policy extraction core
//!
//! Turns the plain text of a policy document into a fixed-schema JSON record
//! by prompting a generation backend, with API-key rotation and retries:
//!
//! 1. `ExtractionRequest` carries the document text and the insurer label
//! 2. `InsurerRegistry` resolves the label to rules and a canonical name
//! 3. `prompt::build_prompt` renders the generation prompt
//! 4. `Orchestrator::extract` runs rounds of attempts, one key per round
//! 5. `normalize` fills in the fixed schema and cleans values

pub mod error;
pub mod insurer;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod schema;

pub use error::{ExtractError, Result};
pub use insurer::{InsurerProfile, InsurerRegistry};
pub use normalize::{normalize, normalize_with};
pub use orchestrator::{Credentials, ExtractionRequest, Orchestrator};
pub use schema::{FIELDS, StructuredRecord};
